// ── Runtime streaming configuration ──
//
// Describes how to reach the auth and streaming endpoints and how to pace
// reconnection. Carries the SDK key but never touches disk: the
// flagstream-config crate (or the embedding application) builds one.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use flagstream_api::{TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

use crate::backoff::ReconnectConfig;
use crate::error::CoreError;
use crate::manager::ManagerSettings;

pub const DEFAULT_AUTH_URL: &str = "https://auth.split.io/api/v2/auth";
pub const DEFAULT_STREAMING_URL: &str = "https://streaming.split.io/sse";

// Parsed once. Both constants are well-formed absolute URLs, which the
// `default_endpoints_parse` test pins down.
static DEFAULT_AUTH_ENDPOINT: LazyLock<Url> =
    LazyLock::new(|| Url::parse(DEFAULT_AUTH_URL).expect("DEFAULT_AUTH_URL is a valid URL"));
static DEFAULT_STREAMING_ENDPOINT: LazyLock<Url> =
    LazyLock::new(|| Url::parse(DEFAULT_STREAMING_URL).expect("DEFAULT_STREAMING_URL is a valid URL"));

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification. Test environments only.
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub sdk_key: SecretString,
    pub auth_url: Url,
    pub streaming_url: Url,
    pub tls: TlsVerification,
    /// Timeout for the auth request.
    pub http_timeout: Duration,
    /// Close the stream if nothing, not even a keep-alive, arrives this long.
    pub idle_timeout: Duration,
    pub default_connection_delay: Duration,
    pub disconnection_grace: Duration,
    pub refresh_safety_margin: Duration,
    pub reconnect: ReconnectConfig,
    /// Sent as the SDK version header.
    pub sdk_version: String,
}

impl StreamingConfig {
    /// Production endpoints and default timings for `sdk_key`.
    pub fn new(sdk_key: SecretString) -> Self {
        Self {
            sdk_key,
            auth_url: DEFAULT_AUTH_ENDPOINT.clone(),
            streaming_url: DEFAULT_STREAMING_ENDPOINT.clone(),
            tls: TlsVerification::default(),
            http_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(80),
            default_connection_delay: Duration::from_secs(60),
            disconnection_grace: Duration::from_secs(60),
            refresh_safety_margin: Duration::from_secs(600),
            reconnect: ReconnectConfig::default(),
            sdk_version: concat!("rust-", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }

    /// Reject settings that can only fail at runtime.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, url) in [("auth", &self.auth_url), ("streaming", &self.streaming_url)] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(CoreError::Config {
                    message: format!("{name} URL must be http(s), got {url}"),
                });
            }
        }
        if self.idle_timeout.is_zero() {
            return Err(CoreError::Config {
                message: "idle timeout must be non-zero".into(),
            });
        }
        if self.reconnect.initial_delay.is_zero() {
            return Err(CoreError::Config {
                message: "reconnect initial delay must be non-zero".into(),
            });
        }
        Ok(())
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: TlsMode::from(&self.tls),
            timeout: self.http_timeout,
            ..TransportConfig::default()
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            default_connection_delay: self.default_connection_delay,
            disconnection_grace: self.disconnection_grace,
            refresh_safety_margin: self.refresh_safety_margin,
        }
    }
}
