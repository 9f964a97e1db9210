use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use super::{TimerSlot, clear_on_done};
use crate::event::{StatusBroadcaster, StatusEvent};
use crate::scheduler::{Task, TaskOutcome, TaskScheduler};

/// Raises `RetryableError` shortly before the streaming token expires,
/// forcing a reconnect with a fresh token.
pub struct RefreshTimer {
    slot: Arc<TimerSlot>,
    task: Arc<dyn Task>,
    safety_margin: Duration,
}

struct ExpireToken {
    broadcaster: Arc<dyn StatusBroadcaster>,
}

impl Task for ExpireToken {
    fn execute(&self) -> BoxFuture<'_, TaskOutcome> {
        Box::pin(async move {
            tracing::info!("streaming token about to expire, reconnecting");
            self.broadcaster.push(StatusEvent::RetryableError);
            TaskOutcome::success()
        })
    }
}

impl RefreshTimer {
    pub fn new(
        scheduler: Arc<dyn TaskScheduler>,
        broadcaster: Arc<dyn StatusBroadcaster>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            slot: Arc::new(TimerSlot::new(scheduler)),
            task: Arc::new(ExpireToken { broadcaster }),
            safety_margin,
        }
    }

    /// Schedule the refresh for a token living `lifetime`.
    /// Returns the delay actually used.
    pub fn schedule(&self, lifetime: Duration) -> Duration {
        let delay = refresh_delay(lifetime, self.safety_margin);
        let mut slot = self.slot.lock();
        self.slot.schedule_locked(
            &mut slot,
            Arc::clone(&self.task),
            delay,
            Some(clear_on_done(&self.slot)),
        );
        tracing::debug!(delay_secs = delay.as_secs(), "token refresh scheduled");
        delay
    }

    pub fn cancel(&self) {
        self.slot.cancel();
    }

    pub fn is_scheduled(&self) -> bool {
        self.slot.is_pending()
    }
}

fn refresh_delay(lifetime: Duration, margin: Duration) -> Duration {
    lifetime.saturating_sub(margin)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::timer::testing::ManualScheduler;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<StatusEvent>>);

    impl StatusBroadcaster for Recorder {
        fn push(&self, event: StatusEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn delay_subtracts_margin_and_clamps() {
        let margin = Duration::from_secs(600);
        assert_eq!(refresh_delay(Duration::from_secs(3600), margin), Duration::from_secs(3000));
        assert_eq!(refresh_delay(Duration::from_secs(300), margin), Duration::ZERO);
    }

    #[tokio::test]
    async fn firing_raises_retryable_error() {
        let scheduler = ManualScheduler::new();
        let recorder = Arc::new(Recorder::default());
        let timer = RefreshTimer::new(scheduler.clone(), recorder.clone(), Duration::from_secs(600));

        assert_eq!(timer.schedule(Duration::from_secs(3600)), Duration::from_secs(3000));
        assert_eq!(scheduler.next_delay(), Some(Duration::from_secs(3000)));

        scheduler.fire_next().await;

        assert_eq!(*recorder.0.lock().unwrap(), vec![StatusEvent::RetryableError]);
        assert!(!timer.is_scheduled());
    }

    #[tokio::test]
    async fn cancel_drops_pending_refresh() {
        let scheduler = ManualScheduler::new();
        let recorder = Arc::new(Recorder::default());
        let timer = RefreshTimer::new(scheduler.clone(), recorder.clone(), Duration::from_secs(600));

        timer.schedule(Duration::from_secs(3600));
        timer.cancel();

        assert_eq!(scheduler.pending(), 0);
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
