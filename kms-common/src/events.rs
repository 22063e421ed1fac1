//! Event types for the KMS device event system
//!
//! Provides the shared event definitions and the EventBus a device uses to
//! publish state changes to any local UI surface (console, lyrics renderer,
//! progress bar).

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use crate::protocol::ControlUpdate;

/// Transport status of one device
///
/// Transitions are enforced by the player's transport state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    /// Nothing loaded
    #[default]
    Idle,
    /// Fetching and decoding both stems
    Loading,
    /// Both stems decoded, not yet started
    Ready,
    Playing,
    Paused,
    /// Last load failed; terminal until a fresh load
    Error,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportStatus::Idle => "idle",
            TransportStatus::Loading => "loading",
            TransportStatus::Ready => "ready",
            TransportStatus::Playing => "playing",
            TransportStatus::Paused => "paused",
            TransportStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Connection state of a device's session channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// First connection attempt in progress
    Connecting,
    /// Connected and joined
    Connected,
    /// Lost the relay; waiting before attempt `attempt`
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted (persistent until restarted)
    Disconnected,
}

/// KMS event types
///
/// Events are broadcast via EventBus and can be serialized for display layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KmsEvent {
    /// Transport status changed (e.g. Ready -> Playing)
    TransportStatusChanged {
        old_status: TransportStatus,
        new_status: TransportStatus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A shared control changed, locally or from another device
    ControlChanged {
        update: ControlUpdate,
        /// True when the change came from another device
        remote: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress update
    ///
    /// Emitted by the ticker; devices with an audio graph derive it from the
    /// audio clock, passive devices from the latest heartbeat.
    PlaybackProgress {
        song_id: Option<String>,
        current_time: f64,
        duration: f64,
        playing: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Both stems of a song finished decoding
    SongLoaded {
        song_id: String,
        duration: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Fetch or decode of a song failed
    SongLoadFailed {
        song_id: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Playback reached the end of the song
    SongEnded {
        song_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session channel connection state changed
    ConnectionChanged {
        state: ConnectionState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus for one device
///
/// Uses tokio::broadcast internally for one-to-many event distribution.
/// Slow subscribers lag and lose the oldest events rather than blocking the
/// control loop.
pub struct EventBus {
    tx: broadcast::Sender<KmsEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<KmsEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: KmsEvent) -> Result<usize, broadcast::error::SendError<KmsEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: KmsEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
