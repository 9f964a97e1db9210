// ── Status events ──
//
// Everything the control plane has to say to the outside world travels as
// a StatusEvent. Events are ephemeral: no history is kept, and a subscriber
// that joins late only sees what happens afterwards.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Streaming subsystem status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusEvent {
    /// Push is usable: connected, streaming enabled and publishers present.
    SubsystemUp,
    /// Push is temporarily unusable; fall back to polling.
    SubsystemDown,
    /// The attempt failed in a way a retry may fix.
    RetryableError,
    /// The attempt failed in a way retrying will not fix.
    NonRetryableError,
    /// Push is disabled for this SDK key, or the server disabled streaming.
    Disabled,
    /// The server asked clients to drop cached state and resync.
    Reset,
    /// The server asked the client to wait this long before connecting.
    Delay(Duration),
}

impl StatusEvent {
    /// Events that end a connection attempt without a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NonRetryableError | Self::Disabled)
    }
}

/// Sink for status events.
pub trait StatusBroadcaster: Send + Sync {
    fn push(&self, event: StatusEvent);
}

/// [`StatusBroadcaster`] over a `tokio::sync::broadcast` channel.
///
/// Pushing never blocks and never fails; with no subscribers the event is
/// dropped. Slow subscribers see `Lagged` rather than stalling producers.
#[derive(Clone)]
pub struct StatusChannel {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`. Lag shows up as `Err` items.
    pub fn stream(&self) -> BroadcastStream<StatusEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster for StatusChannel {
    fn push(&self, event: StatusEvent) {
        tracing::debug!(%event, "status event");
        let _ = self.tx.send(event);
    }
}
