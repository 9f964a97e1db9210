//! Streaming credential decoding.
//!
//! The auth endpoint hands out a JWT. Only its payload matters here: the
//! issue/expiry timestamps drive the refresh timer, and the capability
//! claim lists the channels to subscribe to. The signature is verified by
//! the streaming server, never by the client.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::Error;

/// Prefix that asks the streaming server to attach publisher occupancy
/// metadata to a channel.
pub const OCCUPANCY_PREFIX: &str = "[?occupancy=metrics.publishers]";

const PUBLISHERS_CAPABILITY: &str = "channel-metadata:publishers";

#[derive(Deserialize)]
struct Claims {
    #[serde(rename = "x-ably-capability")]
    capability: String,
    iat: i64,
    exp: i64,
}

/// A decoded streaming credential.
///
/// Produced per connection attempt and consumed immediately; never persisted.
#[derive(Clone)]
pub struct AuthToken {
    channels: Vec<String>,
    raw: SecretString,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Decode a raw JWT into its channel list and lifetime.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let segments: Vec<&str> = raw.split('.').collect();
        let [_, payload, _] = segments.as_slice() else {
            return Err(Error::InvalidToken("expected three JWT segments".into()));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| Error::InvalidToken(format!("payload is not base64url: {e}")))?;

        let claims: Claims = serde_json::from_slice(&bytes).map_err(|e| Error::Deserialization {
            message: format!("invalid token claims: {e}"),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })?;

        let capability: BTreeMap<String, Vec<String>> = serde_json::from_str(&claims.capability)
            .map_err(|e| Error::Deserialization {
                message: format!("invalid capability claim: {e}"),
                body: claims.capability.clone(),
            })?;

        if capability.is_empty() {
            return Err(Error::InvalidToken("token grants no channels".into()));
        }

        let channels = capability
            .into_iter()
            .map(|(channel, perms)| {
                if perms.iter().any(|p| p == PUBLISHERS_CAPABILITY) {
                    format!("{OCCUPANCY_PREFIX}{channel}")
                } else {
                    channel
                }
            })
            .collect();

        let issued_at = DateTime::from_timestamp(claims.iat, 0)
            .ok_or_else(|| Error::InvalidToken(format!("iat out of range: {}", claims.iat)))?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| Error::InvalidToken(format!("exp out of range: {}", claims.exp)))?;

        Ok(Self {
            channels,
            raw: SecretString::from(raw.to_owned()),
            issued_at,
            expires_at,
        })
    }

    /// Channels to subscribe to, sorted by name.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// The raw credential, passed verbatim to the streaming endpoint.
    pub fn raw(&self) -> &str {
        self.raw.expose_secret()
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `expires_at - issued_at`, clamped at zero.
    pub fn lifetime(&self) -> Duration {
        (self.expires_at - self.issued_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("channels", &self.channels)
            .field("raw", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encode_token(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    fn capability() -> String {
        serde_json::json!({
            "xxxx_yyyy_splits": ["subscribe"],
            "control_pri": ["subscribe", "channel-metadata:publishers"],
            "control_sec": ["subscribe", "channel-metadata:publishers"],
            "xxxx_yyyy_segments": ["subscribe"],
        })
        .to_string()
    }

    #[test]
    fn parses_channels_and_lifetime() {
        let raw = encode_token(&serde_json::json!({
            "x-ably-capability": capability(),
            "iat": 1_700_000_000,
            "exp": 1_700_003_600,
        }));

        let token = AuthToken::parse(&raw).unwrap();

        assert_eq!(
            token.channels(),
            &[
                "[?occupancy=metrics.publishers]control_pri".to_string(),
                "[?occupancy=metrics.publishers]control_sec".to_string(),
                "xxxx_yyyy_segments".to_string(),
                "xxxx_yyyy_splits".to_string(),
            ]
        );
        assert_eq!(token.lifetime(), Duration::from_secs(3600));
        assert_eq!(token.issued_at().timestamp(), 1_700_000_000);
        assert_eq!(token.raw(), raw);
    }

    #[test]
    fn expired_before_issued_clamps_to_zero() {
        let raw = encode_token(&serde_json::json!({
            "x-ably-capability": capability(),
            "iat": 1_700_003_600,
            "exp": 1_700_000_000,
        }));
        assert_eq!(AuthToken::parse(&raw).unwrap().lifetime(), Duration::ZERO);
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(matches!(
            AuthToken::parse("onlyone"),
            Err(Error::InvalidToken(_))
        ));
        assert!(matches!(
            AuthToken::parse("a.b.c.d"),
            Err(Error::InvalidToken(_))
        ));
    }

    #[test]
    fn rejects_garbage_payload() {
        assert!(AuthToken::parse("header.!!!.sig").is_err());

        let raw = format!("h.{}.s", URL_SAFE_NO_PAD.encode(b"not json"));
        assert!(matches!(
            AuthToken::parse(&raw),
            Err(Error::Deserialization { .. })
        ));
    }

    #[test]
    fn debug_redacts_raw_credential() {
        let raw = encode_token(&serde_json::json!({
            "x-ably-capability": capability(),
            "iat": 1,
            "exp": 2,
        }));
        let rendered = format!("{:?}", AuthToken::parse(&raw).unwrap());
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&raw));
    }
}
