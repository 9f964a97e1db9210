use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::future::BoxFuture;

use crate::backoff::{BackoffCounter, ReconnectConfig};
use crate::scheduler::{DoneCallback, Task, TaskHandle, TaskOutcome, TaskScheduler};

/// Receives the terminal outcome of a retry sequence: either a
/// do-not-retry failure or the failure that exhausted the attempt limit.
pub type RetryListener = Arc<dyn Fn(TaskOutcome) + Send + Sync>;

/// Backoff timer with an attempt limit and a terminal-outcome listener.
///
/// Like [`BackoffTimer`](super::BackoffTimer), `schedule` is a no-op while
/// a job is pending. A `schedule` that lands while the job is already
/// executing is remembered: if that run succeeds, the task is rescheduled
/// once more instead of the request being lost.
pub struct RetryTimer {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: Arc<dyn TaskScheduler>,
    task: Arc<dyn Task>,
    counter: BackoffCounter,
    max_attempts: Option<u32>,
    listener: Mutex<Option<RetryListener>>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    handle: Option<TaskHandle>,
    running: bool,
    rearm: bool,
    attempts: u32,
}

/// Wraps the user task so the timer knows when execution has begun.
struct Tracked {
    inner: Weak<Inner>,
    handle: Mutex<Option<TaskHandle>>,
}

impl RetryTimer {
    pub fn new(scheduler: Arc<dyn TaskScheduler>, task: Arc<dyn Task>, config: &ReconnectConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                scheduler,
                task,
                counter: BackoffCounter::from_config(config),
                max_attempts: config.max_retries,
                listener: Mutex::new(None),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn set_listener(&self, listener: RetryListener) {
        *self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn schedule(&self) {
        let mut state = self.inner.state();
        if state.handle.is_some() {
            if state.running {
                state.rearm = true;
            }
            return;
        }
        Inner::schedule_locked(&self.inner, &mut state);
    }

    /// Stop retrying and reset both the attempt count and the backoff.
    ///
    /// A run already in progress finishes, but its outcome is ignored.
    pub fn cancel(&self) {
        let mut state = self.inner.state();
        if let Some(handle) = state.handle.take() {
            self.inner.scheduler.cancel(handle);
        }
        *state = State::default();
        self.inner.counter.reset();
    }

    pub fn is_scheduled(&self) -> bool {
        self.inner.state().handle.is_some()
    }

    /// Consecutive failed runs since the last success or reset.
    pub fn attempts(&self) -> u32 {
        self.inner.state().attempts
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule_locked(this: &Arc<Self>, state: &mut State) {
        let delay = this.counter.next();
        let tracked = Arc::new(Tracked {
            inner: Arc::downgrade(this),
            handle: Mutex::new(None),
        });
        // Held until the handle is known so a zero-delay run cannot start untracked.
        let mut tracked_handle = tracked.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = this
            .scheduler
            .schedule(Arc::clone(&tracked) as Arc<dyn Task>, delay, Some(Self::on_done(this)));
        *tracked_handle = Some(handle);
        drop(tracked_handle);

        state.handle = Some(handle);
        state.running = false;
        tracing::debug!(%handle, ?delay, attempt = state.attempts, "retry scheduled");
    }

    fn on_done(this: &Arc<Self>) -> DoneCallback {
        let weak = Arc::downgrade(this);
        Box::new(move |handle, outcome| {
            if let Some(this) = weak.upgrade() {
                Self::finished(&this, handle, outcome);
            }
        })
    }

    fn started(&self, handle: TaskHandle) {
        let mut state = self.state();
        if state.handle == Some(handle) {
            state.running = true;
        }
    }

    fn finished(this: &Arc<Self>, handle: TaskHandle, outcome: TaskOutcome) {
        let terminal = {
            let mut state = this.state();
            if state.handle != Some(handle) {
                return;
            }
            state.handle = None;
            state.running = false;
            let rearm = std::mem::take(&mut state.rearm);

            if outcome.is_success() {
                state.attempts = 0;
                this.counter.reset();
                if rearm {
                    Self::schedule_locked(this, &mut state);
                }
                None
            } else if outcome.do_not_retry {
                tracing::info!(attempts = state.attempts, "retry sequence stopped: do not retry");
                Some(outcome)
            } else {
                state.attempts = state.attempts.saturating_add(1);
                if this.max_attempts.is_some_and(|max| state.attempts >= max) {
                    tracing::warn!(attempts = state.attempts, "retry limit reached, giving up");
                    Some(outcome)
                } else {
                    Self::schedule_locked(this, &mut state);
                    None
                }
            }
        };

        if let Some(outcome) = terminal {
            let listener = this
                .listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(listener) = listener {
                listener(outcome);
            }
        }
    }
}

impl Task for Tracked {
    fn execute(&self) -> BoxFuture<'_, TaskOutcome> {
        Box::pin(async move {
            let Some(inner) = self.inner.upgrade() else {
                return TaskOutcome::do_not_retry();
            };
            let handle = *self.handle.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = handle {
                inner.started(handle);
            }
            let task = Arc::clone(&inner.task);
            drop(inner);
            task.execute().await
        })
    }
}
