//! Shared configuration for flagstream embedders.
//!
//! TOML profiles, SDK key resolution (env + keyring + plaintext),
//! and translation to `flagstream_core::StreamingConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use flagstream_core::{ReconnectConfig, StreamingConfig, TlsVerification};

const KEYRING_SERVICE: &str = "flagstream";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no SDK key configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named environment profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Pick `name`, or the default profile when `None`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile(name.into()))
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub insecure: bool,

    /// HTTP timeout for the auth request, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Stream idle timeout, seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout: default_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    15
}
fn default_idle_timeout() -> u64 {
    80
}

/// A named profile. Unset fields fall back to `defaults` or built-ins.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Auth endpoint override.
    pub auth_url: Option<String>,

    /// Streaming endpoint override.
    pub streaming_url: Option<String>,

    /// SDK key (plaintext; prefer keyring or env var).
    pub sdk_key: Option<String>,

    /// Environment variable name containing the SDK key.
    pub sdk_key_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override HTTP timeout.
    pub timeout: Option<u64>,

    /// Override idle timeout.
    pub idle_timeout: Option<u64>,

    /// Used when the auth response carries no connection delay.
    pub connection_delay_secs: Option<u64>,

    /// How long a paused client keeps its stream open.
    pub disconnection_grace_secs: Option<u64>,

    /// Refresh the token this long before it expires.
    pub refresh_margin_secs: Option<u64>,

    pub backoff_base_secs: Option<u64>,
    pub backoff_max_secs: Option<u64>,

    /// Give up after this many consecutive failed reconnects.
    pub max_reconnect_attempts: Option<u32>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "flagstream", "flagstream").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("flagstream");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path`, with `FLAGSTREAM_*` environment overrides on top.
/// A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FLAGSTREAM_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the SDK key: profile env var, then keyring, then plaintext.
pub fn resolve_sdk_key(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.sdk_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/sdk-key")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    if let Some(ref key) = profile.sdk_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store an SDK key in the system keyring for `profile_name`.
pub fn store_sdk_key(profile_name: &str, sdk_key: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/sdk-key"))
        .and_then(|entry| entry.set_password(sdk_key))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_url(field: &str, raw: &str) -> Result<url::Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// Build a `StreamingConfig` from a profile and the global defaults.
pub fn profile_to_streaming_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<StreamingConfig, ConfigError> {
    let sdk_key = resolve_sdk_key(profile, profile_name)?;
    let mut config = StreamingConfig::new(sdk_key);

    if let Some(ref raw) = profile.auth_url {
        config.auth_url = parse_url("auth_url", raw)?;
    }
    if let Some(ref raw) = profile.streaming_url {
        config.streaming_url = parse_url("streaming_url", raw)?;
    }

    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    config.http_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.idle_timeout = Duration::from_secs(profile.idle_timeout.unwrap_or(defaults.idle_timeout));

    if let Some(secs) = profile.connection_delay_secs {
        config.default_connection_delay = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.disconnection_grace_secs {
        config.disconnection_grace = Duration::from_secs(secs);
    }
    if let Some(secs) = profile.refresh_margin_secs {
        config.refresh_safety_margin = Duration::from_secs(secs);
    }

    let base = ReconnectConfig::default();
    config.reconnect = ReconnectConfig {
        initial_delay: profile.backoff_base_secs.map_or(base.initial_delay, Duration::from_secs),
        max_delay: profile.backoff_max_secs.map_or(base.max_delay, Duration::from_secs),
        max_retries: profile.max_reconnect_attempts.or(base.max_retries),
    };

    config.validate().map_err(|e| ConfigError::Validation {
        field: format!("profile '{profile_name}'"),
        reason: e.to_string(),
    })?;
    Ok(config)
}

/// Load the config file and build the `StreamingConfig` for `profile`.
pub fn load_streaming_config(profile: Option<&str>) -> Result<StreamingConfig, ConfigError> {
    let config = load_config()?;
    let (name, selected) = config.profile(profile)?;
    profile_to_streaming_config(selected, name, &config.defaults)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn plaintext(key: &str) -> Profile {
        Profile {
            sdk_key: Some(key.into()),
            ..Profile::default()
        }
    }

    #[test]
    fn plaintext_key_is_last_resort() {
        let profile = Profile {
            sdk_key_env: Some("FLAGSTREAM_TEST_SURELY_UNSET_VAR".into()),
            ..plaintext("plain-key")
        };
        let key = resolve_sdk_key(&profile, "flagstream-unit-test").unwrap();
        assert_eq!(key.expose_secret(), "plain-key");
    }

    #[test]
    fn env_var_wins_over_plaintext() {
        // PATH is always set, which makes it a stable stand-in.
        let profile = Profile {
            sdk_key_env: Some("PATH".into()),
            ..plaintext("plain-key")
        };
        let key = resolve_sdk_key(&profile, "flagstream-unit-test").unwrap();
        assert_eq!(key.expose_secret(), std::env::var("PATH").unwrap());
    }

    #[test]
    fn missing_key_is_reported() {
        let err = resolve_sdk_key(&Profile::default(), "flagstream-unit-test").unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { ref profile } if profile == "flagstream-unit-test"));
    }

    #[test]
    fn profile_overrides_apply() {
        let profile = Profile {
            streaming_url: Some("http://localhost:7070/sse".into()),
            insecure: Some(true),
            disconnection_grace_secs: Some(5),
            backoff_base_secs: Some(2),
            backoff_max_secs: Some(60),
            max_reconnect_attempts: Some(4),
            ..plaintext("k")
        };
        let config = profile_to_streaming_config(&profile, "flagstream-unit-test", &Defaults::default()).unwrap();

        assert_eq!(config.streaming_url.as_str(), "http://localhost:7070/sse");
        assert_eq!(config.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(config.disconnection_grace, Duration::from_secs(5));
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(config.reconnect.max_retries, Some(4));
        assert_eq!(config.http_timeout, Duration::from_secs(15));
    }

    #[test]
    fn ca_cert_selects_custom_ca() {
        let profile = Profile {
            ca_cert: Some(PathBuf::from("/etc/flagstream/ca.pem")),
            ..plaintext("k")
        };
        let config = profile_to_streaming_config(&profile, "flagstream-unit-test", &Defaults::default()).unwrap();
        assert_eq!(config.tls, TlsVerification::CustomCa(PathBuf::from("/etc/flagstream/ca.pem")));
    }

    #[test]
    fn bad_url_is_rejected() {
        let profile = Profile {
            auth_url: Some("not a url".into()),
            ..plaintext("k")
        };
        let err = profile_to_streaming_config(&profile, "flagstream-unit-test", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "auth_url"));
    }

    #[test]
    fn zero_backoff_fails_validation() {
        let profile = Profile {
            backoff_base_secs: Some(0),
            ..plaintext("k")
        };
        assert!(profile_to_streaming_config(&profile, "flagstream-unit-test", &Defaults::default()).is_err());
    }
}
