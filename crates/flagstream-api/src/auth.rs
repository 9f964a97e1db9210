// Auth handshake over HTTP.
//
// One GET per connection attempt: the SDK key authorizes the call, the
// registered user keys select which per-user channels the token covers.

use futures_util::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Body returned by the auth endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    /// Whether push is enabled for this SDK key at all.
    pub push_enabled: bool,

    /// Raw streaming JWT. Absent when push is disabled.
    #[serde(default)]
    pub token: Option<String>,

    /// Server-directed delay before connecting, in seconds.
    #[serde(default)]
    pub conn_delay: Option<u64>,
}

/// Performs the auth handshake.
///
/// Implementations report HTTP-level rejections through
/// [`Error::AuthRejected`] so callers can tell client errors (never
/// retried) from transient ones.
pub trait AuthFetcher: Send + Sync {
    fn fetch<'a>(&'a self, user_keys: &'a [String]) -> BoxFuture<'a, Result<AuthPayload, Error>>;
}

/// [`AuthFetcher`] backed by `reqwest`.
pub struct HttpAuthFetcher {
    http: reqwest::Client,
    auth_url: Url,
    sdk_key: SecretString,
}

impl HttpAuthFetcher {
    /// Build a fetcher from a `TransportConfig`.
    pub fn new(auth_url: Url, sdk_key: SecretString, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self::with_client(transport.build_client()?, auth_url, sdk_key))
    }

    /// Build a fetcher around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, auth_url: Url, sdk_key: SecretString) -> Self {
        Self {
            http,
            auth_url,
            sdk_key,
        }
    }

    /// The auth endpoint this fetcher calls.
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    fn request_url(&self, user_keys: &[String]) -> Url {
        let mut url = self.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            for key in user_keys {
                query.append_pair("users", key);
            }
        }
        url
    }

    async fn fetch_payload(&self, user_keys: &[String]) -> Result<AuthPayload, Error> {
        let url = self.request_url(user_keys);
        debug!(url = %self.auth_url, keys = user_keys.len(), "requesting streaming token");

        let resp = self
            .http
            .get(url)
            .bearer_auth(self.sdk_key.expose_secret())
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        trace!(status = status.as_u16(), body_len = body.len(), "auth response");

        if !status.is_success() {
            return Err(Error::AuthRejected {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("invalid auth response: {e}"),
            body,
        })
    }
}

impl AuthFetcher for HttpAuthFetcher {
    fn fetch<'a>(&'a self, user_keys: &'a [String]) -> BoxFuture<'a, Result<AuthPayload, Error>> {
        Box::pin(self.fetch_payload(user_keys))
    }
}
