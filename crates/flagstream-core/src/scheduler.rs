//! Delayed task execution.
//!
//! Timers never spawn work themselves; they go through a [`TaskScheduler`]
//! so tests can substitute a manual scheduler and drive time explicitly.
//! [`TokioScheduler`] is the production implementation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

// ── Task types ───────────────────────────────────────────────────────

/// Opaque identifier for one scheduled job. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    /// Build a handle from a scheduler-assigned id. Custom schedulers must
    /// never hand out the same id twice.
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    Error,
}

/// Result of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    /// The failure is terminal; retrying timers must stop.
    pub do_not_retry: bool,
}

impl TaskOutcome {
    pub fn success() -> Self {
        Self {
            status: TaskStatus::Success,
            do_not_retry: false,
        }
    }

    pub fn error() -> Self {
        Self {
            status: TaskStatus::Error,
            do_not_retry: false,
        }
    }

    pub fn do_not_retry() -> Self {
        Self {
            status: TaskStatus::Error,
            do_not_retry: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// A unit of work a timer can run.
pub trait Task: Send + Sync {
    fn execute(&self) -> BoxFuture<'_, TaskOutcome>;
}

/// Invoked once with the outcome of a job that ran. Never invoked for a
/// job cancelled before it started.
pub type DoneCallback = Box<dyn FnOnce(TaskHandle, TaskOutcome) + Send>;

/// Runs tasks after a delay.
///
/// `schedule` never invokes `on_done` synchronously. `cancel` prevents a
/// pending job from starting; a job already executing runs to completion.
pub trait TaskScheduler: Send + Sync {
    fn schedule(
        &self,
        task: Arc<dyn Task>,
        delay: Duration,
        on_done: Option<DoneCallback>,
    ) -> TaskHandle;

    fn cancel(&self, handle: TaskHandle);
}

// ── TokioScheduler ───────────────────────────────────────────────────

/// [`TaskScheduler`] over `tokio::spawn` and `tokio::time::sleep`.
///
/// A job stays in the pending map until its delay elapses; removing the
/// entry is what claims it for execution, so `cancel` and the job race on
/// a single map operation.
pub struct TokioScheduler {
    runtime: Handle,
    next_id: AtomicU64,
    pending: Arc<DashMap<TaskHandle, Option<AbortHandle>>>,
}

impl TokioScheduler {
    /// Scheduler bound to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Jobs whose delay has not yet elapsed.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler for TokioScheduler {
    fn schedule(
        &self,
        task: Arc<dyn Task>,
        delay: Duration,
        on_done: Option<DoneCallback>,
    ) -> TaskHandle {
        let handle = TaskHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.insert(handle, None);

        let pending = Arc::clone(&self.pending);
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if pending.remove(&handle).is_none() {
                return;
            }
            tracing::trace!(%handle, "running scheduled task");
            let outcome = task.execute().await;
            if let Some(on_done) = on_done {
                on_done(handle, outcome);
            }
        });

        // Only attach the abort handle if the job is still pending.
        if let Some(mut slot) = self.pending.get_mut(&handle) {
            *slot = Some(join.abort_handle());
        }
        handle
    }

    fn cancel(&self, handle: TaskHandle) {
        if let Some((_, abort)) = self.pending.remove(&handle) {
            tracing::trace!(%handle, "cancelled scheduled task");
            if let Some(abort) = abort {
                abort.abort();
            }
        }
    }
}
