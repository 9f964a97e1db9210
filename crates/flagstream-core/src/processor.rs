use tokio::sync::mpsc;

use crate::notification::IncomingNotification;

/// Downstream consumer of business updates (flag and segment changes).
///
/// Called synchronously from the stream read loop; implementations must
/// not block.
pub trait NotificationProcessor: Send + Sync {
    fn process(&self, notification: IncomingNotification);
}

/// [`NotificationProcessor`] that forwards into an unbounded channel.
pub struct ChannelProcessor {
    tx: mpsc::UnboundedSender<IncomingNotification>,
}

impl ChannelProcessor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IncomingNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationProcessor for ChannelProcessor {
    fn process(&self, notification: IncomingNotification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("notification receiver dropped; update discarded");
        }
    }
}
