//! Canonical performance session model
//!
//! One `PerformanceSession` exists per performance on the relay. Every device
//! keeps a mirror of it and converges toward the relay's copy. All mutators
//! return `true` only when a field actually changed, which is what makes
//! replayed or echoed messages harmless.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::protocol::ControlUpdate;
use crate::{Error, Result};

/// Default gain for both stems
pub const DEFAULT_VOLUME: f32 = 1.0;

/// Lyrics text size shown on displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LyricsSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl LyricsSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            LyricsSize::Small => "small",
            LyricsSize::Medium => "medium",
            LyricsSize::Large => "large",
        }
    }
}

impl fmt::Display for LyricsSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LyricsSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(LyricsSize::Small),
            "medium" => Ok(LyricsSize::Medium),
            "large" => Ok(LyricsSize::Large),
            other => Err(Error::InvalidInput(format!("unknown lyrics size '{}'", other))),
        }
    }
}

/// Canonical state of one performance
///
/// Serialized as the payload of `performance_state` snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSession {
    /// Song currently selected (None before any song is chosen)
    #[serde(default)]
    pub song_id: Option<String>,
    /// Whether the song is playing
    pub is_playing: bool,
    /// Authoritative progress in seconds
    pub current_time: f64,
    /// Song duration in seconds (0 until a device reports it)
    pub duration: f64,
    /// Vocal stem gain (0.0-1.0)
    pub vocal_volume: f32,
    /// Instrumental stem gain (0.0-1.0)
    pub instrumental_volume: f32,
    /// Lyrics text size
    pub lyrics_size: LyricsSize,
    /// Lyrics timing offset in seconds (signed)
    pub lyrics_offset: f64,
}

impl Default for PerformanceSession {
    fn default() -> Self {
        Self {
            song_id: None,
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            vocal_volume: DEFAULT_VOLUME,
            instrumental_volume: DEFAULT_VOLUME,
            lyrics_size: LyricsSize::default(),
            lyrics_offset: 0.0,
        }
    }
}

impl PerformanceSession {
    /// Apply a shared control value (last writer wins)
    pub fn apply_control(&mut self, update: &ControlUpdate) -> bool {
        match *update {
            ControlUpdate::VocalVolume(v) => replace(&mut self.vocal_volume, clamp_volume(v)),
            ControlUpdate::InstrumentalVolume(v) => {
                replace(&mut self.instrumental_volume, clamp_volume(v))
            }
            ControlUpdate::LyricsSize(size) => replace(&mut self.lyrics_size, size),
            ControlUpdate::LyricsOffset(offset) => replace(&mut self.lyrics_offset, offset),
        }
    }

    pub fn set_playing(&mut self, playing: bool) -> bool {
        replace(&mut self.is_playing, playing)
    }

    /// Explicit seek; the only operation allowed to move `current_time` backwards
    pub fn seek(&mut self, time: f64) -> f64 {
        self.current_time = clamp_time(time);
        self.current_time
    }

    /// Select a new song; progress restarts from zero and transport stops
    pub fn set_song(&mut self, song_id: &str) -> bool {
        if self.song_id.as_deref() == Some(song_id) {
            return false;
        }
        self.song_id = Some(song_id.to_string());
        self.is_playing = false;
        self.current_time = 0.0;
        self.duration = 0.0;
        true
    }

    /// Fold a heartbeat from the playing device into the progress fields
    ///
    /// Heartbeats never drive the transport. One whose `is_playing` disagrees
    /// with the canonical flag is stale and ignored entirely; otherwise the
    /// reported duration is taken and, while playing, progress only moves
    /// forward. Returns whether the heartbeat was accepted.
    pub fn apply_heartbeat(&mut self, is_playing: bool, current_time: f64, duration: f64) -> bool {
        if is_playing != self.is_playing {
            return false;
        }
        if duration.is_finite() && duration > 0.0 {
            self.duration = duration;
        }
        let current_time = clamp_time(current_time);
        if self.is_playing && current_time >= self.current_time {
            self.current_time = current_time;
        }
        true
    }

    /// Current value of one shared control
    pub fn control(&self, field: crate::protocol::ControlField) -> ControlUpdate {
        use crate::protocol::ControlField;
        match field {
            ControlField::VocalVolume => ControlUpdate::VocalVolume(self.vocal_volume),
            ControlField::InstrumentalVolume => {
                ControlUpdate::InstrumentalVolume(self.instrumental_volume)
            }
            ControlField::LyricsSize => ControlUpdate::LyricsSize(self.lyrics_size),
            ControlField::LyricsOffset => ControlUpdate::LyricsOffset(self.lyrics_offset),
        }
    }
}

/// Clamp a gain value into `[0, 1]`; NaN is treated as silence
pub fn clamp_volume(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Clamp a song-time value to be non-negative and finite
pub fn clamp_time(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
