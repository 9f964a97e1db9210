use std::sync::{Arc, Weak};

use super::TimerSlot;
use crate::backoff::BackoffCounter;
use crate::scheduler::{DoneCallback, Task, TaskHandle, TaskOutcome, TaskScheduler};

/// Runs one task until it succeeds, backing off between failures.
///
/// `schedule` is a no-op while a job is pending. A failed run is
/// rescheduled immediately with the counter's next delay; a successful
/// run resets the counter.
pub struct BackoffTimer {
    inner: Arc<Inner>,
}

struct Inner {
    slot: TimerSlot,
    task: Arc<dyn Task>,
    counter: BackoffCounter,
}

impl BackoffTimer {
    pub fn new(scheduler: Arc<dyn TaskScheduler>, task: Arc<dyn Task>, counter: BackoffCounter) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: TimerSlot::new(scheduler),
                task,
                counter,
            }),
        }
    }

    pub fn schedule(&self) {
        let mut slot = self.inner.slot.lock();
        if slot.is_some() {
            return;
        }
        Inner::schedule_locked(&self.inner, &mut slot);
    }

    /// Drop the pending job and reset the backoff sequence.
    pub fn cancel(&self) {
        self.inner.slot.cancel();
        self.inner.counter.reset();
    }

    pub fn is_scheduled(&self) -> bool {
        self.inner.slot.is_pending()
    }
}

impl Inner {
    fn schedule_locked(this: &Arc<Self>, slot: &mut Option<TaskHandle>) {
        let delay = this.counter.next();
        let handle = this
            .slot
            .schedule_locked(slot, Arc::clone(&this.task), delay, Some(Self::on_done(this)));
        tracing::debug!(%handle, delay = ?delay, "backoff job scheduled");
    }

    fn on_done(this: &Arc<Self>) -> DoneCallback {
        let weak: Weak<Self> = Arc::downgrade(this);
        Box::new(move |handle, outcome| {
            if let Some(this) = weak.upgrade() {
                Self::finished(&this, handle, outcome);
            }
        })
    }

    fn finished(this: &Arc<Self>, handle: TaskHandle, outcome: TaskOutcome) {
        let mut slot = this.slot.lock();
        if *slot != Some(handle) {
            return;
        }
        *slot = None;

        if outcome.is_success() {
            this.counter.reset();
        } else if outcome.do_not_retry {
            tracing::debug!(%handle, "backoff job failed terminally");
        } else {
            Self::schedule_locked(this, &mut slot);
        }
    }
}
