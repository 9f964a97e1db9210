//! Single event-stream connection.
//!
//! `connect` owns the whole life of one connection: open, confirm, read
//! until the stream ends. `disconnect` may be called from anywhere and
//! makes a blocked `connect` return promptly; dropping the `connect`
//! future has the same effect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flagstream_api::{AuthToken, StreamTransport};
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::parser::EventStreamParser;
use crate::handler::SseHandler;

const PROTOCOL_VERSION: &str = "1.1";
const SDK_VERSION_HEADER: &str = "SplitSDKVersion";
const CLIENT_KEY_HEADER: &str = "SplitSDKClientKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Headers identifying the SDK to the streaming server. Only the last four
/// characters of the key are sent.
pub fn sdk_headers(sdk_key: &SecretString, sdk_version: &str) -> Vec<(String, String)> {
    let key = sdk_key.expose_secret();
    let start = key.char_indices().rev().nth(3).map_or(0, |(i, _)| i);
    vec![
        (SDK_VERSION_HEADER.to_owned(), sdk_version.to_owned()),
        (CLIENT_KEY_HEADER.to_owned(), key[start..].to_owned()),
    ]
}

pub struct SseClient {
    transport: Arc<dyn StreamTransport>,
    handler: Arc<dyn SseHandler>,
    streaming_url: Url,
    headers: Vec<(String, String)>,
    status: watch::Sender<ConnectionStatus>,
    generation: AtomicU64,
    /// Close signal of the live connection, tagged with its generation.
    active: Mutex<Option<(u64, CancellationToken)>>,
}

impl SseClient {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        handler: Arc<dyn SseHandler>,
        streaming_url: Url,
        headers: Vec<(String, String)>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            transport,
            handler,
            streaming_url,
            headers,
            status,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Open the stream for `token` and read it until it ends.
    ///
    /// `on_connected` runs at most once, when the first frame confirms the
    /// subscription. Failures are reported through the handler, except
    /// those caused by [`disconnect`](Self::disconnect).
    pub async fn connect<F>(&self, token: &AuthToken, on_connected: F)
    where
        F: FnOnce() + Send,
    {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let close = CancellationToken::new();
        if let Some((_, previous)) = self.active().replace((generation, close.clone())) {
            previous.cancel();
        }
        self.status.send_replace(ConnectionStatus::Connecting);
        let _guard = ConnectionGuard {
            client: self,
            generation,
        };

        let url = self.stream_url(token);
        debug!(channels = token.channels().len(), "opening event stream");

        let opened = tokio::select! {
            biased;
            () = close.cancelled() => return,
            opened = self.transport.open(&url, &self.headers) => opened,
        };

        let response = match opened {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "event stream connection failed");
                self.handler.handle_error(e.is_retryable());
                return;
            }
        };
        if !response.is_success() {
            let status = response.status;
            warn!(status, "event stream rejected");
            self.handler.handle_error(!(400..500).contains(&status));
            return;
        }

        let mut lines = response.lines;
        let mut parser = EventStreamParser::new();
        let mut on_connected = Some(on_connected);

        loop {
            let next = tokio::select! {
                biased;
                () = close.cancelled() => {
                    debug!("event stream closed locally");
                    return;
                }
                next = lines.next() => next,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    if !close.is_cancelled() {
                        warn!(error = %e, "event stream read failed");
                        self.handler.handle_error(e.is_retryable());
                    }
                    return;
                }
                None => {
                    if !close.is_cancelled() {
                        info!("event stream ended by server");
                        self.handler.handle_error(true);
                    }
                    return;
                }
            };

            let Some(frame) = parser.push_line(&line) else {
                continue;
            };
            if frame.is_keep_alive() {
                trace!("keep-alive");
                continue;
            }

            if on_connected.is_some() && !frame.is_error() {
                if !self.handler.is_connection_confirmed(&frame) {
                    warn!(?frame, "first frame did not confirm the subscription");
                    self.handler.handle_error(true);
                    return;
                }
                self.status.send_replace(ConnectionStatus::Connected);
                info!("event stream connected");
                if let Some(callback) = on_connected.take() {
                    callback();
                }
            }

            self.handler.handle_incoming_message(&frame);
        }
    }

    /// Close the live connection, if any. Idempotent.
    pub fn disconnect(&self) {
        if let Some((generation, close)) = self.active().take() {
            debug!(generation, "disconnecting event stream");
            close.cancel();
            self.status.send_replace(ConnectionStatus::Disconnected);
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stream_url(&self, token: &AuthToken) -> Url {
        let mut url = self.streaming_url.clone();
        url.query_pairs_mut()
            .append_pair("v", PROTOCOL_VERSION)
            .append_pair("channels", &token.channels().join(","))
            .append_pair("accessToken", token.raw());
        url
    }
}

/// Marks the connection finished however `connect` exits, unless a newer
/// connection has taken over.
struct ConnectionGuard<'a> {
    client: &'a SseClient,
    generation: u64,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.client.active();
        if active.as_ref().is_some_and(|(g, _)| *g == self.generation) {
            *active = None;
            self.client.status.send_replace(ConnectionStatus::Disconnected);
        }
    }
}
