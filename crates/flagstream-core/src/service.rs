// ── Streaming service ──
//
// The entry point for embedders. Wires the HTTP collaborators, the
// control plane and the reconnection supervisor together, and exposes the
// lifecycle surface plus the status event stream.

use std::sync::Arc;

use flagstream_api::{AuthFetcher, HttpAuthFetcher, HttpStreamTransport, StreamTransport};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::authenticator::Authenticator;
use crate::config::StreamingConfig;
use crate::error::CoreError;
use crate::event::{StatusBroadcaster, StatusChannel, StatusEvent};
use crate::handler::NotificationHandler;
use crate::keeper::OccupancyKeeper;
use crate::manager::{ManagerParts, ManagerState, PushNotificationManager};
use crate::processor::NotificationProcessor;
use crate::scheduler::{TaskScheduler, TokioScheduler};
use crate::sse::{ConnectionStatus, SseClient, sdk_headers};
use crate::supervisor::StreamingSupervisor;

/// Real-time update channel of the SDK.
///
/// Construction spawns background tasks and therefore needs a tokio
/// runtime. Nothing connects until [`start`](Self::start).
pub struct StreamingService {
    manager: Arc<PushNotificationManager>,
    supervisor: StreamingSupervisor,
    status: StatusChannel,
    keeper: Arc<OccupancyKeeper>,
}

impl StreamingService {
    /// Build a service talking HTTP to the configured endpoints.
    pub fn new(
        config: &StreamingConfig,
        processor: Arc<dyn NotificationProcessor>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let transport = config.transport();
        let fetcher = HttpAuthFetcher::new(config.auth_url.clone(), config.sdk_key.clone(), &transport)?;
        let stream = HttpStreamTransport::new(&transport, config.idle_timeout)?;

        Ok(Self::with_collaborators(
            config,
            Arc::new(fetcher),
            Arc::new(stream),
            Arc::new(TokioScheduler::new()),
            processor,
        ))
    }

    /// Build a service over caller-supplied collaborators.
    pub fn with_collaborators(
        config: &StreamingConfig,
        fetcher: Arc<dyn AuthFetcher>,
        transport: Arc<dyn StreamTransport>,
        scheduler: Arc<dyn TaskScheduler>,
        processor: Arc<dyn NotificationProcessor>,
    ) -> Self {
        let status = StatusChannel::new();
        let broadcaster: Arc<dyn StatusBroadcaster> = Arc::new(status.clone());

        let keeper = Arc::new(OccupancyKeeper::new(Arc::clone(&broadcaster)));
        let handler = Arc::new(NotificationHandler::new(
            Arc::clone(&keeper),
            processor,
            Arc::clone(&broadcaster),
        ));
        let sse_client = Arc::new(SseClient::new(
            transport,
            handler,
            config.streaming_url.clone(),
            sdk_headers(&config.sdk_key, &config.sdk_version),
        ));

        let manager = Arc::new(PushNotificationManager::new(
            ManagerParts {
                authenticator: Arc::new(Authenticator::new(fetcher)),
                sse_client,
                scheduler: Arc::clone(&scheduler),
                broadcaster,
            },
            config.manager_settings(),
        ));
        let supervisor =
            StreamingSupervisor::spawn(Arc::clone(&manager), &status, scheduler, &config.reconnect);

        Self {
            manager,
            supervisor,
            status,
            keeper,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn start(&self) {
        info!("starting streaming");
        self.supervisor.reset();
        self.manager.start();
    }

    pub fn pause(&self) {
        self.manager.pause();
    }

    pub fn resume(&self) {
        self.manager.resume();
    }

    pub fn stop(&self) {
        info!("stopping streaming");
        self.supervisor.shutdown();
        self.manager.stop();
    }

    pub fn register_key(&self, key: &str) -> bool {
        self.manager.register_key(key)
    }

    pub fn unregister_key(&self, key: &str) -> bool {
        self.manager.unregister_key(key)
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn status_events(&self) -> BroadcastStream<StatusEvent> {
        self.status.stream()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.manager.connection_status()
    }

    pub fn state(&self) -> ManagerState {
        self.manager.state()
    }

    /// Connected, streaming enabled by the server and publishers present.
    pub fn is_push_available(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected && self.keeper.is_push_available()
    }

    pub fn manager(&self) -> &Arc<PushNotificationManager> {
        &self.manager
    }

    pub fn supervisor(&self) -> &StreamingSupervisor {
        &self.supervisor
    }
}
