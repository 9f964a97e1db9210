//! Routing of stream frames.
//!
//! [`NotificationHandler`] sits between the SSE client and everything
//! else: control and occupancy go to the keeper, business updates go to
//! the processor, server errors become status events.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::event::{StatusBroadcaster, StatusEvent};
use crate::keeper::OccupancyKeeper;
use crate::notification::{
    ControlNotification, IncomingNotification, NotificationType, OccupancyNotification,
    StreamingError,
};
use crate::processor::NotificationProcessor;
use crate::sse::SseFrame;

/// Callbacks the SSE client drives while reading a connection.
pub trait SseHandler: Send + Sync {
    /// Whether `frame`, the first one received, proves the server accepted
    /// the subscription.
    fn is_connection_confirmed(&self, frame: &SseFrame) -> bool;

    fn handle_incoming_message(&self, frame: &SseFrame);

    /// The connection failed or ended for reasons other than a local
    /// disconnect.
    fn handle_error(&self, retryable: bool);
}

pub struct NotificationHandler {
    keeper: Arc<OccupancyKeeper>,
    processor: Arc<dyn NotificationProcessor>,
    broadcaster: Arc<dyn StatusBroadcaster>,
}

impl NotificationHandler {
    pub fn new(
        keeper: Arc<OccupancyKeeper>,
        processor: Arc<dyn NotificationProcessor>,
        broadcaster: Arc<dyn StatusBroadcaster>,
    ) -> Self {
        Self {
            keeper,
            processor,
            broadcaster,
        }
    }

    pub fn keeper(&self) -> &Arc<OccupancyKeeper> {
        &self.keeper
    }

    fn handle_streaming_error(&self, data: &str) {
        let error = match StreamingError::parse(data) {
            Ok(error) => error,
            Err(e) => {
                warn!(error = %e, "unparseable streaming error, treating as retryable");
                self.broadcaster.push(StatusEvent::RetryableError);
                return;
            }
        };

        if error.should_be_ignored() {
            debug!(code = error.code, message = %error.message, "ignoring streaming error");
            return;
        }

        warn!(
            code = error.code,
            status = error.status_code,
            message = %error.message,
            "streaming server reported an error"
        );
        let event = if error.is_retryable() {
            StatusEvent::RetryableError
        } else {
            StatusEvent::NonRetryableError
        };
        self.broadcaster.push(event);
    }

    fn route(&self, notification: IncomingNotification) {
        match notification.kind {
            NotificationType::Control => match ControlNotification::from_incoming(&notification) {
                Ok(control) => self.keeper.handle_control(&control),
                Err(e) => warn!(error = %e, "malformed control notification"),
            },
            NotificationType::Occupancy => match OccupancyNotification::from_incoming(&notification) {
                Ok(occupancy) => self.keeper.handle_occupancy(&occupancy),
                Err(e) => warn!(error = %e, "malformed occupancy notification"),
            },
            kind => {
                if self.keeper.is_streaming_active() {
                    trace!(%kind, channel = %notification.channel, "forwarding update");
                    self.processor.process(notification);
                } else {
                    debug!(%kind, "streaming paused, dropping update");
                }
            }
        }
    }
}

impl SseHandler for NotificationHandler {
    fn is_connection_confirmed(&self, frame: &SseFrame) -> bool {
        let id_only = frame.id().is_some() && frame.data().is_none() && frame.event().is_none();
        let data_frame = frame.data().is_some() && !frame.is_error();
        id_only || data_frame
    }

    fn handle_incoming_message(&self, frame: &SseFrame) {
        let Some(data) = frame.data() else {
            trace!("frame without data");
            return;
        };

        if frame.is_error() {
            self.handle_streaming_error(data);
            return;
        }

        match IncomingNotification::parse(data) {
            Ok(notification) => self.route(notification),
            Err(e) => debug!(error = %e, "skipping unrecognised notification"),
        }
    }

    fn handle_error(&self, retryable: bool) {
        self.broadcaster.push(if retryable {
            StatusEvent::RetryableError
        } else {
            StatusEvent::NonRetryableError
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<StatusEvent>>);

    impl StatusBroadcaster for Recorder {
        fn push(&self, event: StatusEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<IncomingNotification>>);

    impl NotificationProcessor for Collect {
        fn process(&self, notification: IncomingNotification) {
            self.0.lock().unwrap().push(notification);
        }
    }

    struct Fixture {
        events: Arc<Recorder>,
        updates: Arc<Collect>,
        handler: NotificationHandler,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(Recorder::default());
        let updates = Arc::new(Collect::default());
        let keeper = Arc::new(OccupancyKeeper::new(events.clone()));
        let handler = NotificationHandler::new(keeper, updates.clone(), events.clone());
        Fixture {
            events,
            updates,
            handler,
        }
    }

    fn data_frame(name: Option<&str>, channel: &str, timestamp: i64, data: &serde_json::Value) -> SseFrame {
        let mut env = json!({
            "id": "x",
            "timestamp": timestamp,
            "channel": channel,
            "data": data.to_string(),
        });
        if let Some(name) = name {
            env["name"] = json!(name);
        }
        SseFrame::from_fields([("id", "x"), ("data", env.to_string().as_str())])
    }

    #[test]
    fn confirmation_rules() {
        let f = fixture();
        assert!(f.handler.is_connection_confirmed(&SseFrame::from_fields([("id", "abc")])));
        assert!(f.handler.is_connection_confirmed(&SseFrame::from_fields([("data", "{}")])));
        assert!(!f.handler.is_connection_confirmed(&SseFrame::from_fields([
            ("event", "error"),
            ("data", "{}")
        ])));
        assert!(!f.handler.is_connection_confirmed(&SseFrame::from_fields([("event", "message")])));
    }

    #[test]
    fn updates_forwarded_while_active() {
        let f = fixture();
        let frame = data_frame(None, "splits", 1, &json!({"type": "SPLIT_UPDATE"}));

        f.handler.handle_incoming_message(&frame);
        assert_eq!(f.updates.0.lock().unwrap().len(), 1);

        let pause = data_frame(
            None,
            "control_pri",
            2,
            &json!({"type": "CONTROL", "controlType": "STREAMING_PAUSED"}),
        );
        f.handler.handle_incoming_message(&pause);
        f.handler.handle_incoming_message(&frame);

        assert_eq!(f.updates.0.lock().unwrap().len(), 1);
        assert_eq!(*f.events.0.lock().unwrap(), vec![StatusEvent::SubsystemDown]);
    }

    #[test]
    fn occupancy_reaches_keeper() {
        let f = fixture();
        let frame = data_frame(
            Some("[meta]occupancy"),
            "[?occupancy=metrics.publishers]control_pri",
            5,
            &json!({"metrics": {"publishers": 0}}),
        );

        f.handler.handle_incoming_message(&frame);

        assert!(!f.handler.keeper().is_push_available());
        assert_eq!(*f.events.0.lock().unwrap(), vec![StatusEvent::SubsystemDown]);
    }

    #[test]
    fn error_frames_are_classified() {
        let f = fixture();
        let error = |code: i64| {
            let body = json!({"message": "m", "code": code, "statusCode": 401}).to_string();
            SseFrame::from_fields([("event", "error"), ("data", body.as_str())])
        };

        f.handler.handle_incoming_message(&error(40142));
        f.handler.handle_incoming_message(&error(40300));
        f.handler.handle_incoming_message(&error(50000));

        assert_eq!(
            *f.events.0.lock().unwrap(),
            vec![StatusEvent::RetryableError, StatusEvent::NonRetryableError]
        );
    }

    #[test]
    fn handle_error_maps_retryability() {
        let f = fixture();
        f.handler.handle_error(true);
        f.handler.handle_error(false);
        assert_eq!(
            *f.events.0.lock().unwrap(),
            vec![StatusEvent::RetryableError, StatusEvent::NonRetryableError]
        );
    }
}
