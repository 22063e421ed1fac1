//! Device <-> relay wire protocol
//!
//! Every frame is a JSON object tagged by `type`. Device-originated frames are
//! [`ClientMessage`]s, relay-originated frames are [`ServerMessage`]s. Shared
//! controls travel as a `{control, value}` pair on the wire and are lifted into
//! the typed [`ControlUpdate`] on receipt.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::{clamp_time, clamp_volume, LyricsSize, PerformanceSession};
use crate::{Error, Result};

/// Which stem of the song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Vocal,
    Instrumental,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Vocal => "vocal",
            Track::Instrumental => "instrumental",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a shared control on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlField {
    VocalVolume,
    InstrumentalVolume,
    LyricsSize,
    LyricsOffset,
}

/// Raw control value on the wire (number or lyrics size)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Number(f64),
    Size(LyricsSize),
}

/// Typed shared control value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "control", content = "value", rename_all = "snake_case")]
pub enum ControlUpdate {
    VocalVolume(f32),
    InstrumentalVolume(f32),
    LyricsSize(LyricsSize),
    LyricsOffset(f64),
}

impl ControlUpdate {
    /// Lift a wire pair into a typed update, clamping numeric domains
    pub fn from_wire(control: ControlField, value: ControlValue) -> Result<Self> {
        match (control, value) {
            (ControlField::VocalVolume, ControlValue::Number(v)) => {
                Ok(ControlUpdate::VocalVolume(clamp_volume(v as f32)))
            }
            (ControlField::InstrumentalVolume, ControlValue::Number(v)) => {
                Ok(ControlUpdate::InstrumentalVolume(clamp_volume(v as f32)))
            }
            (ControlField::LyricsSize, ControlValue::Size(size)) => {
                Ok(ControlUpdate::LyricsSize(size))
            }
            (ControlField::LyricsOffset, ControlValue::Number(v)) if v.is_finite() => {
                Ok(ControlUpdate::LyricsOffset(v))
            }
            (control, value) => Err(Error::InvalidInput(format!(
                "value {:?} is not valid for control {:?}",
                value, control
            ))),
        }
    }

    /// Split into the wire `{control, value}` pair
    pub fn to_wire(&self) -> (ControlField, ControlValue) {
        match *self {
            ControlUpdate::VocalVolume(v) => (ControlField::VocalVolume, ControlValue::Number(v as f64)),
            ControlUpdate::InstrumentalVolume(v) => {
                (ControlField::InstrumentalVolume, ControlValue::Number(v as f64))
            }
            ControlUpdate::LyricsSize(size) => (ControlField::LyricsSize, ControlValue::Size(size)),
            ControlUpdate::LyricsOffset(v) => (ControlField::LyricsOffset, ControlValue::Number(v)),
        }
    }

    pub fn field(&self) -> ControlField {
        self.to_wire().0
    }

    /// Volume update for a given stem
    pub fn volume(track: Track, value: f32) -> Self {
        match track {
            Track::Vocal => ControlUpdate::VocalVolume(clamp_volume(value)),
            Track::Instrumental => ControlUpdate::InstrumentalVolume(clamp_volume(value)),
        }
    }
}

/// Frames sent by a device to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the performance addressed by the connection URL
    JoinPerformance,
    /// Change a shared control
    UpdatePerformanceControl {
        control: ControlField,
        value: ControlValue,
    },
    PlaybackPlay,
    PlaybackPause,
    PlaybackSeek { time: f64 },
    PlaybackSetSong { song_id: String },
    /// Heartbeat from the playing device (informational only)
    #[serde(rename_all = "camelCase")]
    UpdatePlayerState {
        is_playing: bool,
        current_time: f64,
        duration: f64,
    },
}

impl ClientMessage {
    pub fn control(update: ControlUpdate) -> Self {
        let (control, value) = update.to_wire();
        ClientMessage::UpdatePerformanceControl { control, value }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("bad client frame: {}", e)))
    }
}

/// Frames sent by the relay to devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full snapshot, sent in reply to every join
    PerformanceState(PerformanceSession),
    ControlUpdated {
        control: ControlField,
        value: ControlValue,
    },
    PlaybackPlay,
    PlaybackPause,
    PlaybackSeek { time: f64 },
    PlaybackSetSong { song_id: String },
    #[serde(rename_all = "camelCase")]
    PlayerStateUpdated {
        is_playing: bool,
        current_time: f64,
        duration: f64,
    },
    /// Rejected frame; the connection stays open
    Error { message: String },
}

impl ServerMessage {
    pub fn control_updated(update: ControlUpdate) -> Self {
        let (control, value) = update.to_wire();
        ServerMessage::ControlUpdated { control, value }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("bad relay frame: {}", e)))
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::PerformanceState(_) => "performance_state",
            ServerMessage::ControlUpdated { .. } => "control_updated",
            ServerMessage::PlaybackPlay => "playback_play",
            ServerMessage::PlaybackPause => "playback_pause",
            ServerMessage::PlaybackSeek { .. } => "playback_seek",
            ServerMessage::PlaybackSetSong { .. } => "playback_set_song",
            ServerMessage::PlayerStateUpdated { .. } => "player_state_updated",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// One user action on a device
#[derive(Debug, Clone, PartialEq)]
pub enum ControlIntent {
    Play,
    Pause,
    Seek(f64),
    SetVolume(Track, f32),
    SetLyricsSize(LyricsSize),
    SetLyricsOffset(f64),
    SetSong(String),
}

impl ControlIntent {
    /// Frame announcing this intent to the rest of the performance
    pub fn to_message(&self) -> ClientMessage {
        match self {
            ControlIntent::Play => ClientMessage::PlaybackPlay,
            ControlIntent::Pause => ClientMessage::PlaybackPause,
            ControlIntent::Seek(t) => ClientMessage::PlaybackSeek { time: clamp_time(*t) },
            ControlIntent::SetVolume(track, v) => ClientMessage::control(ControlUpdate::volume(*track, *v)),
            ControlIntent::SetLyricsSize(size) => {
                ClientMessage::control(ControlUpdate::LyricsSize(*size))
            }
            ControlIntent::SetLyricsOffset(offset) => {
                ClientMessage::control(ControlUpdate::LyricsOffset(*offset))
            }
            ControlIntent::SetSong(song_id) => ClientMessage::PlaybackSetSong {
                song_id: song_id.clone(),
            },
        }
    }
}
