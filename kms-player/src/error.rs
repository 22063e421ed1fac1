//! Error types for kms-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use kms_common::events::TransportStatus;
use kms_common::Track;
use thiserror::Error;

use crate::state::TransportEvent;

/// Failure while loading one stem of a song
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Media server unreachable, timed out or returned an error
    #[error("Failed to fetch {track} track of song {song_id}: {message}")]
    Fetch {
        song_id: String,
        track: Track,
        message: String,
    },

    /// Bytes arrived but could not be decoded into samples
    #[error("Failed to decode {track} track of song {song_id}: {message}")]
    Decode {
        song_id: String,
        track: Track,
        message: String,
    },
}

impl DecodeError {
    pub fn song_id(&self) -> &str {
        match self {
            DecodeError::Fetch { song_id, .. } | DecodeError::Decode { song_id, .. } => song_id,
        }
    }
}

/// Main error type for kms-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Track fetch or decode errors
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Codec, container or resampling failure inside the decode pipeline
    #[error("Codec error: {0}")]
    Codec(String),

    /// Relay or media server connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Transport state machine rejected an event
    #[error("Invalid transition: {event} while {from}")]
    InvalidTransition {
        from: TransportStatus,
        event: TransportEvent,
    },

    /// Shared protocol or input errors
    #[error(transparent)]
    Common(#[from] kms_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using kms-player Error
pub type Result<T> = std::result::Result<T, Error>;
