//! Scheduler-backed timers.
//!
//! Every timer holds at most one scheduled job. Scheduling cancels the
//! previous job first; completion clears the stored handle only if it is
//! still the one that completed, so a stale completion never clobbers a
//! newer job.

mod backoff;
mod disconnection;
mod refresh;
mod retry;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

pub use backoff::BackoffTimer;
pub use disconnection::DisconnectionTimer;
pub use refresh::RefreshTimer;
pub use retry::{RetryListener, RetryTimer};

use crate::scheduler::{DoneCallback, Task, TaskHandle, TaskScheduler};

/// Single-job slot shared by the fire-once and backoff timers.
///
/// The lock is held across `TaskScheduler::schedule`, which is safe
/// because schedulers never run `on_done` synchronously.
pub(crate) struct TimerSlot {
    scheduler: Arc<dyn TaskScheduler>,
    handle: Mutex<Option<TaskHandle>>,
}

impl TimerSlot {
    pub(crate) fn new(scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            scheduler,
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<TaskHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel whatever `slot` holds and schedule `task` in its place.
    pub(crate) fn schedule_locked(
        &self,
        slot: &mut Option<TaskHandle>,
        task: Arc<dyn Task>,
        delay: Duration,
        on_done: Option<DoneCallback>,
    ) -> TaskHandle {
        if let Some(previous) = slot.take() {
            self.scheduler.cancel(previous);
        }
        let handle = self.scheduler.schedule(task, delay, on_done);
        *slot = Some(handle);
        handle
    }

    /// Drop the pending job, if any. Returns whether one was held.
    pub(crate) fn cancel(&self) -> bool {
        let mut slot = self.lock();
        match slot.take() {
            Some(handle) => {
                self.scheduler.cancel(handle);
                true
            }
            None => false,
        }
    }

    /// Compare-and-clear: forget `handle` only if it is the current one.
    pub(crate) fn clear_if(&self, handle: TaskHandle) -> bool {
        let mut slot = self.lock();
        if *slot == Some(handle) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}

/// Completion callback for fire-once timers: clears the slot it was
/// scheduled from.
pub(crate) fn clear_on_done(slot: &Arc<TimerSlot>) -> DoneCallback {
    let weak: Weak<TimerSlot> = Arc::downgrade(slot);
    Box::new(move |handle, _outcome| {
        if let Some(slot) = weak.upgrade() {
            slot.clear_if(handle);
        }
    })
}
