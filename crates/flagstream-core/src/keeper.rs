// ── Occupancy & control keeper ──
//
// Decides whether push is currently usable from two independent inputs:
// server control messages (the streaming-active flag) and per-channel
// publisher counts. Every call runs in one critical section, including
// the events it raises, so events leave in the same order state changed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::event::{StatusBroadcaster, StatusEvent};
use crate::notification::{ControlNotification, ControlType, OccupancyNotification};

const PRIMARY_SUFFIX: &str = "control_pri";
const SECONDARY_SUFFIX: &str = "control_sec";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum OccupancyChannel {
    Primary,
    Secondary,
}

impl OccupancyChannel {
    /// Resolve a (possibly prefixed) channel name.
    pub fn resolve(channel: &str) -> Option<Self> {
        if channel.ends_with(PRIMARY_SUFFIX) {
            Some(Self::Primary)
        } else if channel.ends_with(SECONDARY_SUFFIX) {
            Some(Self::Secondary)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChannelOccupancy {
    publishers: u32,
    last_timestamp: i64,
}

#[derive(Debug)]
struct State {
    active: bool,
    last_control_timestamp: i64,
    primary: ChannelOccupancy,
    secondary: ChannelOccupancy,
}

impl State {
    fn total(&self) -> u32 {
        self.primary.publishers.saturating_add(self.secondary.publishers)
    }

    fn channel_mut(&mut self, channel: OccupancyChannel) -> &mut ChannelOccupancy {
        match channel {
            OccupancyChannel::Primary => &mut self.primary,
            OccupancyChannel::Secondary => &mut self.secondary,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self {
            active: true,
            last_control_timestamp: 0,
            primary: ChannelOccupancy {
                publishers: 1,
                last_timestamp: 0,
            },
            secondary: ChannelOccupancy {
                publishers: 0,
                last_timestamp: 0,
            },
        }
    }
}

/// Tracks streaming-active state and publisher occupancy.
///
/// Timestamps persist across reconnects: a message older than one already
/// applied is dropped even if it arrives on a fresh connection.
pub struct OccupancyKeeper {
    state: Mutex<State>,
    broadcaster: Arc<dyn StatusBroadcaster>,
}

impl OccupancyKeeper {
    pub fn new(broadcaster: Arc<dyn StatusBroadcaster>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            broadcaster,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle_control(&self, notification: &ControlNotification) {
        let mut state = self.lock();
        if notification.timestamp <= state.last_control_timestamp {
            debug!(
                timestamp = notification.timestamp,
                last = state.last_control_timestamp,
                "dropping stale control notification"
            );
            return;
        }
        state.last_control_timestamp = notification.timestamp;

        match notification.control_type {
            ControlType::StreamingPaused => {
                info!("streaming paused by server");
                state.active = false;
                self.broadcaster.push(StatusEvent::SubsystemDown);
            }
            ControlType::StreamingDisabled => {
                warn!("streaming disabled by server");
                state.active = false;
                self.broadcaster.push(StatusEvent::SubsystemDown);
                self.broadcaster.push(StatusEvent::Disabled);
            }
            ControlType::StreamingEnabled => {
                info!("streaming enabled by server");
                state.active = true;
                if state.total() > 0 {
                    self.broadcaster.push(StatusEvent::SubsystemUp);
                }
            }
            ControlType::StreamingReset => {
                if state.total() > 0 {
                    self.broadcaster.push(StatusEvent::Reset);
                }
            }
        }
    }

    pub fn handle_occupancy(&self, notification: &OccupancyNotification) {
        let Some(channel) = OccupancyChannel::resolve(&notification.channel) else {
            warn!(channel = %notification.channel, "occupancy for unknown channel");
            return;
        };

        let mut state = self.lock();
        let entry = state.channel_mut(channel);
        if notification.timestamp <= entry.last_timestamp {
            debug!(%channel, timestamp = notification.timestamp, "dropping stale occupancy");
            return;
        }

        let before = state.total();
        let entry = state.channel_mut(channel);
        entry.publishers = notification.publishers;
        entry.last_timestamp = notification.timestamp;
        let after = state.total();
        debug!(%channel, publishers = notification.publishers, total = after, "occupancy updated");

        if before == 0 && after > 0 && state.active {
            self.broadcaster.push(StatusEvent::SubsystemUp);
        } else if before > 0 && after == 0 {
            self.broadcaster.push(StatusEvent::SubsystemDown);
        }
    }

    /// Whether the server currently allows streaming.
    pub fn is_streaming_active(&self) -> bool {
        self.lock().active
    }

    /// Streaming active and at least one publisher present.
    pub fn is_push_available(&self) -> bool {
        let state = self.lock();
        state.active && state.total() > 0
    }

    pub fn publishers(&self, channel: OccupancyChannel) -> u32 {
        let mut state = self.lock();
        state.channel_mut(channel).publishers
    }
}
