// ── Core error types ──
//
// Errors from flagstream-core. Only construction can fail: once a
// StreamingService exists, every failure becomes a StatusEvent. The
// `From<flagstream_api::Error>` impl folds wire-level errors into these
// variants.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<flagstream_api::Error> for CoreError {
    fn from(err: flagstream_api::Error) -> Self {
        match err {
            flagstream_api::Error::InvalidUrl(e) => CoreError::InvalidUrl(e),
            flagstream_api::Error::Tls(message) => CoreError::Config {
                message: format!("TLS setup failed: {message}"),
            },
            other => CoreError::Api {
                status: other.http_status(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_errors_become_config_errors() {
        let err: CoreError = flagstream_api::Error::Tls("bad CA".into()).into();
        assert!(matches!(err, CoreError::Config { ref message } if message.contains("bad CA")));
    }

    #[test]
    fn http_errors_keep_status() {
        let err: CoreError = flagstream_api::Error::AuthRejected {
            status: 401,
            message: "nope".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Api { status: Some(401), .. }));
    }
}
