use std::sync::Arc;
use std::time::Duration;

use super::{TimerSlot, clear_on_done};
use crate::scheduler::{Task, TaskScheduler};

/// Fire-once timer that defers teardown after the host application pauses.
///
/// If the application resumes within the grace period the timer is
/// cancelled and the connection survives.
pub struct DisconnectionTimer {
    slot: Arc<TimerSlot>,
    task: Arc<dyn Task>,
    grace: Duration,
}

impl DisconnectionTimer {
    pub fn new(scheduler: Arc<dyn TaskScheduler>, task: Arc<dyn Task>, grace: Duration) -> Self {
        Self {
            slot: Arc::new(TimerSlot::new(scheduler)),
            task,
            grace,
        }
    }

    /// (Re)start the grace period.
    pub fn schedule(&self) {
        let mut slot = self.slot.lock();
        let handle = self.slot.schedule_locked(
            &mut slot,
            Arc::clone(&self.task),
            self.grace,
            Some(clear_on_done(&self.slot)),
        );
        tracing::debug!(%handle, grace_secs = self.grace.as_secs(), "disconnection scheduled");
    }

    pub fn cancel(&self) {
        if self.slot.cancel() {
            tracing::debug!("disconnection cancelled");
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.slot.is_pending()
    }
}
