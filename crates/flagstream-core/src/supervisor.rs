//! Reconnection policy.
//!
//! The manager reports failures but never retries. The supervisor watches
//! the status stream and decides:
//!
//! - `RetryableError` schedules a reconnect through a [`RetryTimer`], with
//!   exponential backoff between consecutive failures.
//! - `NonRetryableError` and `Disabled` cancel any pending reconnect and
//!   halt the manager until it is explicitly started again.
//!
//! A reconnect job succeeds when the new attempt raises `SubsystemUp`,
//! which resets the backoff.

use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::ReconnectConfig;
use crate::event::{StatusChannel, StatusEvent};
use crate::manager::PushNotificationManager;
use crate::scheduler::{Task, TaskOutcome, TaskScheduler};
use crate::timer::RetryTimer;

pub struct StreamingSupervisor {
    retry: Arc<RetryTimer>,
    shutdown: CancellationToken,
    watcher: JoinHandle<()>,
}

impl StreamingSupervisor {
    /// Start watching `status`. Must be called within a tokio runtime.
    pub fn spawn(
        manager: Arc<PushNotificationManager>,
        status: &StatusChannel,
        scheduler: Arc<dyn TaskScheduler>,
        reconnect: &ReconnectConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let task = Arc::new(ReconnectTask {
            manager: Arc::clone(&manager),
            status: status.clone(),
            shutdown: shutdown.clone(),
        });
        let retry = Arc::new(RetryTimer::new(scheduler, task, reconnect));

        let weak_manager: Weak<PushNotificationManager> = Arc::downgrade(&manager);
        retry.set_listener(Arc::new(move |outcome| {
            warn!(do_not_retry = outcome.do_not_retry, "giving up on streaming reconnects");
            if let Some(manager) = weak_manager.upgrade() {
                manager.halt();
            }
        }));

        let watcher = tokio::spawn(watch_status(
            status.subscribe(),
            Arc::clone(&retry),
            manager,
            shutdown.clone(),
        ));

        Self {
            retry,
            shutdown,
            watcher,
        }
    }

    /// Forget any pending reconnect and its backoff history.
    pub fn reset(&self) {
        self.retry.cancel();
    }

    pub fn is_reconnect_scheduled(&self) -> bool {
        self.retry.is_scheduled()
    }

    /// Consecutive failed reconnects since the last success.
    pub fn failed_attempts(&self) -> u32 {
        self.retry.attempts()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.retry.cancel();
    }
}

impl Drop for StreamingSupervisor {
    fn drop(&mut self) {
        self.shutdown();
        self.watcher.abort();
    }
}

async fn watch_status(
    mut events: broadcast::Receiver<StatusEvent>,
    retry: Arc<RetryTimer>,
    manager: Arc<PushNotificationManager>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(StatusEvent::RetryableError) => {
                debug!("retryable streaming error, scheduling reconnect");
                retry.schedule();
            }
            Ok(StatusEvent::NonRetryableError | StatusEvent::Disabled) => {
                info!("streaming unavailable until restarted");
                retry.cancel();
                manager.halt();
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "supervisor lagged behind status events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("streaming supervisor exiting");
}

/// One reconnect: ask the manager for a fresh attempt and wait for its
/// verdict. While the host is paused the verdict arrives after `resume()`.
struct ReconnectTask {
    manager: Arc<PushNotificationManager>,
    status: StatusChannel,
    shutdown: CancellationToken,
}

impl Task for ReconnectTask {
    fn execute(&self) -> BoxFuture<'_, TaskOutcome> {
        Box::pin(async move {
            let mut events = self.status.subscribe();
            info!("reconnecting streaming");
            self.manager.reconnect();

            loop {
                let event = tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => return TaskOutcome::do_not_retry(),
                    event = events.recv() => event,
                };
                match event {
                    Ok(StatusEvent::SubsystemUp) => return TaskOutcome::success(),
                    Ok(StatusEvent::RetryableError) => return TaskOutcome::error(),
                    Ok(StatusEvent::NonRetryableError | StatusEvent::Disabled) => {
                        return TaskOutcome::do_not_retry();
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return TaskOutcome::do_not_retry(),
                }
            }
        })
    }
}
