// ── Push notification manager ──
//
// Orchestrates connection attempts: authenticate, wait the server-directed
// delay, connect, read. One actor task owns the lifecycle state and is
// driven by a command channel; each attempt runs in its own task so that
// lifecycle commands are never stuck behind a blocking read. Starting a new
// attempt cancels and joins the previous one first, so at most one attempt
// is ever live.
//
// The manager never retries. Failures surface as status events and the
// reconnection supervisor decides what to do with them.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::authenticator::{AuthResult, Authenticator};
use crate::event::{StatusBroadcaster, StatusEvent};
use crate::scheduler::{Task, TaskOutcome, TaskScheduler};
use crate::sse::{ConnectionStatus, SseClient};
use crate::timer::{DisconnectionTimer, RefreshTimer};

// ── Public types ─────────────────────────────────────────────────────

/// Lifecycle flags observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerState {
    /// `stop()` was called. Permanent.
    pub stopped: bool,
    /// The host application is in the background.
    pub paused: bool,
    /// Push is disabled or credentials were rejected. Cleared by `start()`.
    pub terminal: bool,
}

/// Timing knobs for the manager.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Connection delay when the auth response does not specify one.
    pub default_connection_delay: Duration,
    /// How long a paused manager keeps its connection open.
    pub disconnection_grace: Duration,
    /// Reconnect this long before the streaming token expires.
    pub refresh_safety_margin: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            default_connection_delay: Duration::from_secs(60),
            disconnection_grace: Duration::from_secs(60),
            refresh_safety_margin: Duration::from_secs(600),
        }
    }
}

/// Collaborators the manager drives.
pub struct ManagerParts {
    pub authenticator: Arc<Authenticator>,
    pub sse_client: Arc<SseClient>,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub broadcaster: Arc<dyn StatusBroadcaster>,
}

#[derive(Debug)]
enum ManagerCommand {
    Start,
    Pause,
    Resume,
    Stop,
    Halt,
    Reconnect,
    GraceExpired,
    AttemptConnected { id: u64, token_lifetime: Duration },
    AttemptTerminal { id: u64 },
    AttemptAbandoned { id: u64 },
}

// ── PushNotificationManager ──────────────────────────────────────────

/// Handle to the manager actor.
///
/// All lifecycle methods are fire-and-forget: they enqueue a command and
/// return immediately. Dropping the handle stops the actor.
pub struct PushNotificationManager {
    commands: mpsc::UnboundedSender<ManagerCommand>,
    state: watch::Receiver<ManagerState>,
    authenticator: Arc<Authenticator>,
    sse_client: Arc<SseClient>,
}

impl PushNotificationManager {
    /// Spawn the manager actor. Must be called within a tokio runtime.
    pub fn new(parts: ManagerParts, settings: ManagerSettings) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ManagerState::default());

        let refresh_timer = RefreshTimer::new(
            Arc::clone(&parts.scheduler),
            Arc::clone(&parts.broadcaster),
            settings.refresh_safety_margin,
        );
        let disconnection_timer = DisconnectionTimer::new(
            Arc::clone(&parts.scheduler),
            Arc::new(GraceExpired {
                commands: commands.downgrade(),
            }),
            settings.disconnection_grace,
        );

        let actor = Actor {
            rx,
            commands: commands.downgrade(),
            state: state_tx,
            authenticator: Arc::clone(&parts.authenticator),
            sse_client: Arc::clone(&parts.sse_client),
            broadcaster: parts.broadcaster,
            default_delay: settings.default_connection_delay,
            refresh_timer,
            disconnection_timer,
            attempt: None,
            next_attempt_id: 0,
            reconnect_owed: false,
        };
        tokio::spawn(actor.run());

        Self {
            commands,
            state,
            authenticator: parts.authenticator,
            sse_client: parts.sse_client,
        }
    }

    /// Begin (or restart) streaming. Clears a sticky terminal state.
    pub fn start(&self) {
        self.send(ManagerCommand::Start);
    }

    /// The host application went to the background. The connection is
    /// kept for the grace period, then closed.
    pub fn pause(&self) {
        self.send(ManagerCommand::Pause);
    }

    /// The host application came back. Reconnects if the connection was
    /// closed while paused.
    pub fn resume(&self) {
        self.send(ManagerCommand::Resume);
    }

    /// Shut down for good.
    pub fn stop(&self) {
        self.send(ManagerCommand::Stop);
    }

    /// Close the connection and stay down until the next `start()`.
    pub(crate) fn halt(&self) {
        self.send(ManagerCommand::Halt);
    }

    /// Start a fresh attempt on behalf of the reconnection policy. Unlike
    /// `start()` this keeps the host's pause: while paused the reconnect
    /// is owed and runs on `resume()`. Ignored while halted.
    pub(crate) fn reconnect(&self) {
        self.send(ManagerCommand::Reconnect);
    }

    pub fn register_key(&self, key: &str) -> bool {
        self.authenticator.register_key(key)
    }

    pub fn unregister_key(&self, key: &str) -> bool {
        self.authenticator.unregister_key(key)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.sse_client.status()
    }

    pub fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ManagerState> {
        self.state.clone()
    }

    fn send(&self, command: ManagerCommand) {
        if self.commands.send(command).is_err() {
            debug!("manager stopped; command ignored");
        }
    }
}

// ── Disconnection timer task ─────────────────────────────────────────

struct GraceExpired {
    commands: mpsc::WeakUnboundedSender<ManagerCommand>,
}

impl Task for GraceExpired {
    fn execute(&self) -> BoxFuture<'_, TaskOutcome> {
        Box::pin(async move {
            if let Some(commands) = self.commands.upgrade() {
                let _ = commands.send(ManagerCommand::GraceExpired);
            }
            TaskOutcome::success()
        })
    }
}

// ── Actor ────────────────────────────────────────────────────────────

struct Attempt {
    id: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

struct Actor {
    rx: mpsc::UnboundedReceiver<ManagerCommand>,
    commands: mpsc::WeakUnboundedSender<ManagerCommand>,
    state: watch::Sender<ManagerState>,
    authenticator: Arc<Authenticator>,
    sse_client: Arc<SseClient>,
    broadcaster: Arc<dyn StatusBroadcaster>,
    default_delay: Duration,
    refresh_timer: RefreshTimer,
    disconnection_timer: DisconnectionTimer,
    attempt: Option<Attempt>,
    next_attempt_id: u64,
    /// A reconnect was requested while paused.
    reconnect_owed: bool,
}

impl Actor {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            debug!(?command, "manager command");
            match command {
                ManagerCommand::Start => self.start().await,
                ManagerCommand::Pause => self.pause(),
                ManagerCommand::Resume => self.resume().await,
                ManagerCommand::Stop => break,
                ManagerCommand::Halt => self.halt().await,
                ManagerCommand::Reconnect => self.reconnect().await,
                ManagerCommand::GraceExpired => self.grace_expired().await,
                ManagerCommand::AttemptConnected { id, token_lifetime } => {
                    if self.is_current(id) {
                        self.refresh_timer.schedule(token_lifetime);
                    }
                }
                ManagerCommand::AttemptTerminal { id } => {
                    if self.is_current(id) {
                        self.state.send_modify(|s| s.terminal = true);
                    }
                }
                ManagerCommand::AttemptAbandoned { id } => self.attempt_abandoned(id).await,
            }
        }

        self.shutdown().await;
    }

    fn lifecycle(&self) -> ManagerState {
        *self.state.borrow()
    }

    fn is_current(&self, id: u64) -> bool {
        self.attempt.as_ref().is_some_and(|a| a.id == id)
    }

    async fn start(&mut self) {
        self.state.send_modify(|s| {
            s.terminal = false;
            s.paused = false;
        });
        self.reconnect_owed = false;
        self.disconnection_timer.cancel();
        self.start_attempt().await;
    }

    fn pause(&mut self) {
        info!("streaming paused by host");
        self.state.send_modify(|s| s.paused = true);
        self.disconnection_timer.schedule();
    }

    async fn resume(&mut self) {
        info!("streaming resumed by host");
        self.state.send_modify(|s| s.paused = false);
        self.disconnection_timer.cancel();

        let state = self.lifecycle();
        let owed = std::mem::take(&mut self.reconnect_owed);
        let idle = self
            .attempt
            .as_ref()
            .is_none_or(|a| a.join.is_finished());
        let dropped = idle && self.sse_client.status() == ConnectionStatus::Disconnected;
        if !state.terminal && self.next_attempt_id > 0 && (owed || dropped) {
            self.start_attempt().await;
        }
    }

    async fn reconnect(&mut self) {
        let state = self.lifecycle();
        if state.terminal {
            debug!("reconnect ignored: streaming halted");
            return;
        }
        if state.paused {
            debug!("reconnect deferred until resume");
            self.reconnect_owed = true;
            self.cancel_attempt().await;
            self.refresh_timer.cancel();
            return;
        }
        self.start_attempt().await;
    }

    async fn halt(&mut self) {
        warn!("streaming halted until restarted");
        self.state.send_modify(|s| s.terminal = true);
        self.reconnect_owed = false;
        self.cancel_attempt().await;
        self.refresh_timer.cancel();
    }

    async fn grace_expired(&mut self) {
        if !self.lifecycle().paused {
            return;
        }
        info!("grace period over, closing stream");
        self.cancel_attempt().await;
        self.refresh_timer.cancel();
    }

    async fn attempt_abandoned(&mut self, id: u64) {
        if !self.is_current(id) {
            return;
        }
        let state = self.lifecycle();
        if state.paused || state.terminal {
            self.cancel_attempt().await;
        } else {
            // A resume slipped in while the attempt was bailing out.
            self.start_attempt().await;
        }
    }

    async fn start_attempt(&mut self) {
        self.cancel_attempt().await;
        self.refresh_timer.cancel();

        self.next_attempt_id += 1;
        let id = self.next_attempt_id;
        let cancel = CancellationToken::new();
        let ctx = AttemptContext {
            id,
            cancel: cancel.clone(),
            authenticator: Arc::clone(&self.authenticator),
            sse_client: Arc::clone(&self.sse_client),
            broadcaster: Arc::clone(&self.broadcaster),
            commands: self.commands.clone(),
            lifecycle: self.state.subscribe(),
            default_delay: self.default_delay,
        };
        info!(attempt = id, "starting connection attempt");
        let join = tokio::spawn(ctx.run());
        self.attempt = Some(Attempt { id, cancel, join });
    }

    async fn cancel_attempt(&mut self) {
        let Some(attempt) = self.attempt.take() else {
            return;
        };
        attempt.cancel.cancel();
        self.sse_client.disconnect();
        if let Err(e) = attempt.join.await {
            if e.is_panic() {
                warn!(attempt = attempt.id, error = %e, "connection attempt panicked");
            }
        }
        debug!(attempt = attempt.id, "connection attempt finished");
    }

    async fn shutdown(&mut self) {
        info!("push notification manager stopping");
        self.state.send_modify(|s| s.stopped = true);
        self.cancel_attempt().await;
        self.sse_client.disconnect();
        self.refresh_timer.cancel();
        self.disconnection_timer.cancel();
    }
}

// ── Connection attempt ───────────────────────────────────────────────

struct AttemptContext {
    id: u64,
    cancel: CancellationToken,
    authenticator: Arc<Authenticator>,
    sse_client: Arc<SseClient>,
    broadcaster: Arc<dyn StatusBroadcaster>,
    commands: mpsc::WeakUnboundedSender<ManagerCommand>,
    lifecycle: watch::Receiver<ManagerState>,
    default_delay: Duration,
}

impl AttemptContext {
    async fn run(self) {
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            result = self.authenticator.authenticate(self.default_delay) => result,
        };

        let (token, delay) = match result {
            AuthResult::Ready {
                token,
                connection_delay,
            } => (token, connection_delay),
            AuthResult::PushDisabled => {
                self.notify(ManagerCommand::AttemptTerminal { id: self.id });
                self.broadcaster.push(StatusEvent::Disabled);
                return;
            }
            AuthResult::NonRecoverable { http_status } => {
                warn!(attempt = self.id, ?http_status, "streaming credentials rejected");
                self.notify(ManagerCommand::AttemptTerminal { id: self.id });
                self.broadcaster.push(StatusEvent::NonRetryableError);
                return;
            }
            AuthResult::Retryable { http_status } => {
                debug!(attempt = self.id, ?http_status, "auth failed, retry expected");
                self.broadcaster.push(StatusEvent::RetryableError);
                return;
            }
        };

        if self.is_paused_or_stopped() {
            self.abandon();
            return;
        }

        self.broadcaster.push(StatusEvent::Delay(delay));
        debug!(attempt = self.id, ?delay, "waiting before connecting");
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            () = wait_paused_or_stopped(self.lifecycle.clone()) => {
                self.abandon();
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }
        if self.is_paused_or_stopped() {
            self.abandon();
            return;
        }

        let token_lifetime = token.lifetime();
        let broadcaster = Arc::clone(&self.broadcaster);
        let commands = self.commands.clone();
        let id = self.id;
        let on_connected = move || {
            broadcaster.push(StatusEvent::SubsystemUp);
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(ManagerCommand::AttemptConnected { id, token_lifetime });
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            () = self.sse_client.connect(&token, on_connected) => {}
        }
        debug!(attempt = self.id, "connection attempt ended");
    }

    fn is_paused_or_stopped(&self) -> bool {
        let state = *self.lifecycle.borrow();
        state.paused || state.stopped
    }

    fn abandon(&self) {
        debug!(attempt = self.id, "attempt abandoned: manager paused");
        self.notify(ManagerCommand::AttemptAbandoned { id: self.id });
    }

    fn notify(&self, command: ManagerCommand) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(command);
        }
    }
}

async fn wait_paused_or_stopped(mut lifecycle: watch::Receiver<ManagerState>) {
    if lifecycle.wait_for(|s| s.paused || s.stopped).await.is_err() {
        // Actor gone; nothing will ever change again.
        std::future::pending::<()>().await;
    }
}
