// ── Authenticator ──
//
// Runs the auth handshake that precedes every connection attempt and
// classifies the result. Registered user keys decide which per-user
// channels the issued token covers; the set may change while a call is
// in flight, in which case the next attempt picks up the change.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use std::time::Duration;

use flagstream_api::{AuthFetcher, AuthToken};
use tracing::{debug, info, warn};

/// Outcome of one auth handshake.
#[derive(Debug, Clone)]
pub enum AuthResult {
    /// Push is disabled for this SDK key. Terminal, but not an error.
    PushDisabled,
    /// The auth endpoint rejected the credentials (4xx). Never retried.
    NonRecoverable { http_status: Option<u16> },
    /// A transient failure; retry later.
    Retryable { http_status: Option<u16> },
    /// Connect with `token` after waiting `connection_delay`.
    Ready {
        token: AuthToken,
        connection_delay: Duration,
    },
}

impl AuthResult {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PushDisabled | Self::NonRecoverable { .. })
    }
}

pub struct Authenticator {
    fetcher: Arc<dyn AuthFetcher>,
    keys: RwLock<BTreeSet<String>>,
}

impl Authenticator {
    pub fn new(fetcher: Arc<dyn AuthFetcher>) -> Self {
        Self {
            fetcher,
            keys: RwLock::new(BTreeSet::new()),
        }
    }

    /// Add a user key to the set sent with the next handshake.
    /// Returns `false` if it was already registered.
    pub fn register_key(&self, key: &str) -> bool {
        self.keys_mut().insert(key.to_owned())
    }

    pub fn unregister_key(&self, key: &str) -> bool {
        self.keys_mut().remove(key)
    }

    pub fn registered_keys(&self) -> Vec<String> {
        self.keys_ref().iter().cloned().collect()
    }

    /// Perform the handshake. `default_delay` applies when the server
    /// does not specify a connection delay.
    pub async fn authenticate(&self, default_delay: Duration) -> AuthResult {
        let keys = self.registered_keys();
        debug!(keys = keys.len(), "authenticating");

        let payload = match self.fetcher.fetch(&keys).await {
            Ok(payload) => payload,
            Err(e) if e.is_client_error() => {
                warn!(error = %e, "streaming auth rejected");
                return AuthResult::NonRecoverable {
                    http_status: e.http_status(),
                };
            }
            Err(e) => {
                warn!(error = %e, "streaming auth failed");
                return AuthResult::Retryable {
                    http_status: e.http_status(),
                };
            }
        };

        if !payload.push_enabled {
            info!("push disabled for this SDK key");
            return AuthResult::PushDisabled;
        }

        let Some(raw) = payload.token else {
            warn!("push enabled but no token returned");
            return AuthResult::Retryable { http_status: None };
        };

        match AuthToken::parse(&raw) {
            Ok(token) => AuthResult::Ready {
                token,
                connection_delay: payload
                    .conn_delay
                    .map_or(default_delay, Duration::from_secs),
            },
            Err(e) => {
                warn!(error = %e, "could not decode streaming token");
                AuthResult::Retryable { http_status: None }
            }
        }
    }

    fn keys_ref(&self) -> RwLockReadGuard<'_, BTreeSet<String>> {
        self.keys.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn keys_mut(&self) -> RwLockWriteGuard<'_, BTreeSet<String>> {
        self.keys.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use flagstream_api::{AuthPayload, Error};
    use futures_util::future::BoxFuture;

    use super::*;

    struct Canned {
        response: Mutex<Option<Result<AuthPayload, Error>>>,
        seen_keys: Mutex<Vec<Vec<String>>>,
    }

    impl Canned {
        fn new(response: Result<AuthPayload, Error>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
                seen_keys: Mutex::new(Vec::new()),
            })
        }
    }

    impl AuthFetcher for Canned {
        fn fetch<'a>(&'a self, user_keys: &'a [String]) -> BoxFuture<'a, Result<AuthPayload, Error>> {
            self.seen_keys.lock().unwrap().push(user_keys.to_vec());
            let response = self.response.lock().unwrap().take().unwrap();
            Box::pin(async move { response })
        }
    }

    fn jwt() -> String {
        let claims = serde_json::json!({
            "x-ably-capability": r#"{"control_pri":["subscribe","channel-metadata:publishers"],"splits":["subscribe"]}"#,
            "iat": 1_000,
            "exp": 4_600,
        });
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode("{}"),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    fn enabled(token: Option<String>, conn_delay: Option<u64>) -> AuthPayload {
        AuthPayload {
            push_enabled: true,
            token,
            conn_delay,
        }
    }

    #[tokio::test]
    async fn ready_uses_server_delay() {
        let auth = Authenticator::new(Canned::new(Ok(enabled(Some(jwt()), Some(5)))));
        match auth.authenticate(Duration::from_secs(60)).await {
            AuthResult::Ready {
                token,
                connection_delay,
            } => {
                assert_eq!(connection_delay, Duration::from_secs(5));
                assert_eq!(token.lifetime(), Duration::from_secs(3600));
                assert_eq!(token.channels().len(), 2);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ready_falls_back_to_default_delay() {
        let auth = Authenticator::new(Canned::new(Ok(enabled(Some(jwt()), None))));
        let AuthResult::Ready {
            connection_delay, ..
        } = auth.authenticate(Duration::from_secs(60)).await
        else {
            panic!("expected Ready");
        };
        assert_eq!(connection_delay, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn push_disabled_is_terminal() {
        let payload = AuthPayload {
            push_enabled: false,
            token: None,
            conn_delay: None,
        };
        let result = Authenticator::new(Canned::new(Ok(payload)))
            .authenticate(Duration::ZERO)
            .await;
        assert!(matches!(result, AuthResult::PushDisabled));
        assert!(result.is_terminal());
    }

    #[tokio::test]
    async fn client_error_is_non_recoverable() {
        let err = Error::AuthRejected {
            status: 401,
            message: String::new(),
        };
        let result = Authenticator::new(Canned::new(Err(err)))
            .authenticate(Duration::ZERO)
            .await;
        assert!(matches!(
            result,
            AuthResult::NonRecoverable {
                http_status: Some(401)
            }
        ));
    }

    #[tokio::test]
    async fn server_error_and_bad_token_are_retryable() {
        let err = Error::AuthRejected {
            status: 503,
            message: String::new(),
        };
        let result = Authenticator::new(Canned::new(Err(err)))
            .authenticate(Duration::ZERO)
            .await;
        assert!(matches!(
            result,
            AuthResult::Retryable {
                http_status: Some(503)
            }
        ));

        let result = Authenticator::new(Canned::new(Err(Error::StreamRead("reset".into()))))
            .authenticate(Duration::ZERO)
            .await;
        assert!(matches!(result, AuthResult::Retryable { http_status: None }));

        let result = Authenticator::new(Canned::new(Ok(enabled(Some("garbage".into()), None))))
            .authenticate(Duration::ZERO)
            .await;
        assert!(matches!(result, AuthResult::Retryable { http_status: None }));

        let result = Authenticator::new(Canned::new(Ok(enabled(None, None))))
            .authenticate(Duration::ZERO)
            .await;
        assert!(matches!(result, AuthResult::Retryable { http_status: None }));
    }

    #[tokio::test]
    async fn registered_keys_are_sent_sorted() {
        let fetcher = Canned::new(Ok(enabled(Some(jwt()), None)));
        let auth = Authenticator::new(fetcher.clone());

        assert!(auth.register_key("bob"));
        assert!(auth.register_key("alice"));
        assert!(!auth.register_key("bob"));
        assert!(auth.register_key("carol"));
        assert!(auth.unregister_key("carol"));

        auth.authenticate(Duration::ZERO).await;
        assert_eq!(
            *fetcher.seen_keys.lock().unwrap(),
            vec![vec!["alice".to_string(), "bob".to_string()]]
        );
    }
}
