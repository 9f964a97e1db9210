use thiserror::Error;

/// Top-level error type for the `flagstream-api` crate.
///
/// Covers every failure mode at the wire boundary: the auth handshake,
/// the long-lived event-stream transport, and token decoding.
/// `flagstream-core` classifies these into retryable / non-retryable
/// outcomes and never lets them cross its public lifecycle surface.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The auth endpoint answered with a non-success HTTP status.
    #[error("Auth endpoint rejected the request (HTTP {status}): {message}")]
    AuthRejected { status: u16, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Streaming ───────────────────────────────────────────────────
    /// Reading from an open event stream failed mid-way.
    #[error("Event stream read failed: {0}")]
    StreamRead(String),

    /// No bytes (not even a keep-alive) arrived within the idle window.
    #[error("Event stream idle for more than {idle_secs}s")]
    IdleTimeout { idle_secs: u64 },

    // ── Data ────────────────────────────────────────────────────────
    /// The streaming credential could not be decoded.
    #[error("Invalid streaming token: {0}")]
    InvalidToken(String),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// The HTTP status attached to this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::AuthRejected { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` for 4xx responses: a configuration problem that
    /// retrying will not fix.
    pub fn is_client_error(&self) -> bool {
        self.http_status().is_some_and(|s| (400..500).contains(&s))
    }

    /// Returns `true` if the failure came from certificate verification.
    pub fn is_certificate_error(&self) -> bool {
        match self {
            Self::Tls(_) => true,
            Self::Transport(e) => source_chain_mentions_certificate(e),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_retryable(&self) -> bool {
        !(self.is_client_error() || self.is_certificate_error())
    }
}

/// rustls surfaces verification failures as opaque boxed errors deep in
/// the source chain, so the only stable signal is the rendered message.
fn source_chain_mentions_certificate(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.to_string().to_ascii_lowercase().contains("certificate") {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejected_4xx_is_client_error() {
        let err = Error::AuthRejected {
            status: 401,
            message: "unauthorized".into(),
        };
        assert_eq!(err.http_status(), Some(401));
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn auth_rejected_5xx_is_retryable() {
        let err = Error::AuthRejected {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(!err.is_client_error());
        assert!(err.is_retryable());
    }

    #[test]
    fn tls_error_is_not_retryable() {
        let err = Error::Tls("invalid peer certificate: UnknownIssuer".into());
        assert!(err.is_certificate_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn stream_errors_are_retryable() {
        assert!(Error::StreamRead("connection reset".into()).is_retryable());
        assert!(Error::IdleTimeout { idle_secs: 80 }.is_retryable());
        assert_eq!(Error::IdleTimeout { idle_secs: 80 }.http_status(), None);
    }

    #[test]
    fn error_display() {
        let err = Error::IdleTimeout { idle_secs: 80 };
        assert_eq!(err.to_string(), "Event stream idle for more than 80s");

        let err = Error::InvalidToken("missing payload segment".into());
        assert_eq!(
            err.to_string(),
            "Invalid streaming token: missing payload segment"
        );
    }
}
