// flagstream-core: Streaming control plane for feature-flag updates.
//
// Holds a long-lived event-stream connection so flag and segment changes
// reach the SDK without polling, and reports through status events when
// push is unusable so the caller can fall back to polling.

pub mod authenticator;
pub mod backoff;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod keeper;
pub mod manager;
pub mod notification;
pub mod processor;
pub mod scheduler;
pub mod service;
pub mod sse;
pub mod supervisor;
pub mod timer;

// ── Primary re-exports ──────────────────────────────────────────────
pub use authenticator::{AuthResult, Authenticator};
pub use backoff::{BackoffCounter, ReconnectConfig};
pub use config::{StreamingConfig, TlsVerification};
pub use error::CoreError;
pub use event::{StatusBroadcaster, StatusChannel, StatusEvent};
pub use handler::{NotificationHandler, SseHandler};
pub use keeper::{OccupancyChannel, OccupancyKeeper};
pub use manager::{ManagerParts, ManagerSettings, ManagerState, PushNotificationManager};
pub use notification::{
    ControlNotification, ControlType, IncomingNotification, NotificationError, NotificationType,
    OccupancyNotification, StreamingError,
};
pub use processor::{ChannelProcessor, NotificationProcessor};
pub use scheduler::{Task, TaskHandle, TaskOutcome, TaskScheduler, TaskStatus, TokioScheduler};
pub use service::StreamingService;
pub use sse::{ConnectionStatus, SseClient, SseFrame};
pub use supervisor::StreamingSupervisor;
