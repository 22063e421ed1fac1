//! Transport state machine
//!
//! States: idle, loading, ready, playing, paused, error.
//!
//! ```text
//! any ──load──> loading ──ok──> ready ──play──> playing <──play── paused
//!                  │                               │                 ^
//!                  └──fail──> error                └──pause/finish───┘
//! any ──cleanup──> idle
//! ```
//!
//! Seek never changes status. Error is terminal until a fresh load.

use kms_common::events::TransportStatus;
use std::fmt;

use crate::error::{Error, Result};

/// Input to the transport state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Load,
    LoadSucceeded,
    LoadFailed,
    Play,
    Pause,
    Seek,
    /// Playback reached the end of the song
    Finished,
    Cleanup,
}

impl TransportEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportEvent::Load => "load",
            TransportEvent::LoadSucceeded => "load_succeeded",
            TransportEvent::LoadFailed => "load_failed",
            TransportEvent::Play => "play",
            TransportEvent::Pause => "pause",
            TransportEvent::Seek => "seek",
            TransportEvent::Finished => "finished",
            TransportEvent::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next status for `event` in status `from`
pub fn transition(from: TransportStatus, event: TransportEvent) -> Result<TransportStatus> {
    use TransportEvent as E;
    use TransportStatus as S;

    let next = match (from, event) {
        // Switching songs is allowed from every state, including a
        // superseded load still in flight
        (_, E::Load) => S::Loading,
        (_, E::Cleanup) => S::Idle,

        (S::Loading, E::LoadSucceeded) => S::Ready,
        (S::Loading, E::LoadFailed) => S::Error,

        (S::Ready | S::Paused, E::Play) => S::Playing,
        (S::Playing, E::Pause | E::Finished) => S::Paused,

        (S::Ready | S::Playing | S::Paused, E::Seek) => from,

        (from, event) => return Err(Error::InvalidTransition { from, event }),
    };
    Ok(next)
}

/// True when decoded buffers are present
pub fn has_buffers(status: TransportStatus) -> bool {
    matches!(
        status,
        TransportStatus::Ready | TransportStatus::Playing | TransportStatus::Paused
    )
}
