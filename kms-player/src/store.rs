//! Control state store
//!
//! Per-device mirror of the performance's canonical session. Local actions
//! are applied optimistically and never rolled back; relay broadcasts and
//! snapshots overwrite them field by field (last writer wins).
//!
//! Every apply returns only the changes that actually altered state, which
//! is what makes echoes and at-least-once redelivery harmless. Explicit
//! seeks are the exception: they always produce a change.

use kms_common::protocol::{ClientMessage, ControlField, ControlUpdate, ServerMessage};
use kms_common::{ControlIntent, PerformanceSession};
use tracing::{debug, warn};

use crate::error::Result;

/// A state change the device must act on
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// New song selected (progress restarts at zero)
    Song(String),
    Playing(bool),
    /// Explicit seek
    Seek(f64),
    /// Position carried by a snapshot; only a resync hint
    Position(f64),
    Control(ControlUpdate),
}

/// Progress last reported by the playing device
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressView {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
}

/// Mirror of the canonical performance session
#[derive(Debug, Default)]
pub struct ControlStateStore {
    session: PerformanceSession,
    progress: ProgressView,
}

impl ControlStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &PerformanceSession {
        &self.session
    }

    pub fn progress(&self) -> ProgressView {
        self.progress
    }

    pub fn is_playing(&self) -> bool {
        self.session.is_playing
    }

    /// Apply a local user action before it is sent
    pub fn apply_local(&mut self, intent: &ControlIntent) -> Vec<StoreChange> {
        // Same canonical mutation the relay performs
        self.apply_message(&intent.to_message())
    }

    /// Apply a relay frame
    pub fn apply_remote(&mut self, message: &ServerMessage) -> Result<Vec<StoreChange>> {
        let changes = match message {
            ServerMessage::PerformanceState(snapshot) => self.apply_snapshot(snapshot.clone()),
            ServerMessage::ControlUpdated { control, value } => {
                let update = ControlUpdate::from_wire(*control, *value)?;
                self.apply_control(update)
            }
            ServerMessage::PlaybackPlay => self.apply_message(&ClientMessage::PlaybackPlay),
            ServerMessage::PlaybackPause => self.apply_message(&ClientMessage::PlaybackPause),
            ServerMessage::PlaybackSeek { time } => {
                self.apply_message(&ClientMessage::PlaybackSeek { time: *time })
            }
            ServerMessage::PlaybackSetSong { song_id } => {
                self.apply_message(&ClientMessage::PlaybackSetSong {
                    song_id: song_id.clone(),
                })
            }
            ServerMessage::PlayerStateUpdated {
                is_playing,
                current_time,
                duration,
            } => {
                // Informational only; never touches controls or transport
                self.progress = ProgressView {
                    is_playing: *is_playing,
                    current_time: *current_time,
                    duration: *duration,
                };
                Vec::new()
            }
            ServerMessage::Error { message } => {
                warn!("Relay rejected a frame: {}", message);
                Vec::new()
            }
        };
        Ok(changes)
    }

    /// Replace the mirror with a full snapshot
    pub fn apply_snapshot(&mut self, snapshot: PerformanceSession) -> Vec<StoreChange> {
        let mut changes = Vec::new();

        if let Some(song_id) = &snapshot.song_id {
            if self.session.song_id.as_ref() != Some(song_id) {
                changes.push(StoreChange::Song(song_id.clone()));
            }
        }
        for field in [
            ControlField::VocalVolume,
            ControlField::InstrumentalVolume,
            ControlField::LyricsSize,
            ControlField::LyricsOffset,
        ] {
            let update = snapshot.control(field);
            if self.session.control(field) != update {
                changes.push(StoreChange::Control(update));
            }
        }
        if self.session.current_time != snapshot.current_time {
            changes.push(StoreChange::Position(snapshot.current_time));
        }
        if self.session.is_playing != snapshot.is_playing {
            changes.push(StoreChange::Playing(snapshot.is_playing));
        }

        self.progress = ProgressView {
            is_playing: snapshot.is_playing,
            current_time: snapshot.current_time,
            duration: snapshot.duration,
        };
        self.session = snapshot;
        debug!("Applied snapshot ({} changes)", changes.len());
        changes
    }

    fn apply_control(&mut self, update: ControlUpdate) -> Vec<StoreChange> {
        if self.session.apply_control(&update) {
            // Report the stored (clamped) value
            vec![StoreChange::Control(self.session.control(update.field()))]
        } else {
            Vec::new()
        }
    }

    fn apply_message(&mut self, message: &ClientMessage) -> Vec<StoreChange> {
        match message {
            ClientMessage::UpdatePerformanceControl { control, value } => {
                match ControlUpdate::from_wire(*control, *value) {
                    Ok(update) => self.apply_control(update),
                    Err(e) => {
                        warn!("Ignoring control update: {}", e);
                        Vec::new()
                    }
                }
            }
            ClientMessage::PlaybackPlay => self.set_playing(true),
            ClientMessage::PlaybackPause => self.set_playing(false),
            ClientMessage::PlaybackSeek { time } => vec![StoreChange::Seek(self.session.seek(*time))],
            ClientMessage::PlaybackSetSong { song_id } => {
                if self.session.set_song(song_id) {
                    self.progress = ProgressView::default();
                    vec![StoreChange::Song(song_id.clone())]
                } else {
                    Vec::new()
                }
            }
            ClientMessage::JoinPerformance | ClientMessage::UpdatePlayerState { .. } => Vec::new(),
        }
    }

    fn set_playing(&mut self, playing: bool) -> Vec<StoreChange> {
        if self.session.set_playing(playing) {
            vec![StoreChange::Playing(playing)]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kms_common::{LyricsSize, Track};

    #[test]
    fn test_local_changes_reported_once() {
        let mut store = ControlStateStore::new();
        let intent = ControlIntent::SetVolume(Track::Vocal, 0.4);

        assert_eq!(
            store.apply_local(&intent),
            vec![StoreChange::Control(ControlUpdate::VocalVolume(0.4))]
        );
        assert!(store.apply_local(&intent).is_empty());
    }

    #[test]
    fn test_echo_of_local_change_is_noop() {
        let mut store = ControlStateStore::new();
        store.apply_local(&ControlIntent::Play);

        let changes = store.apply_remote(&ServerMessage::PlaybackPlay).unwrap();
        assert!(changes.is_empty());
        assert!(store.is_playing());
    }

    #[test]
    fn test_replayed_control_is_idempotent() {
        let mut store = ControlStateStore::new();
        let msg = ServerMessage::control_updated(ControlUpdate::LyricsSize(LyricsSize::Large));

        assert_eq!(store.apply_remote(&msg).unwrap().len(), 1);
        let before = store.session().clone();
        assert!(store.apply_remote(&msg).unwrap().is_empty());
        assert_eq!(store.session(), &before);
    }

    #[test]
    fn test_remote_overwrites_local() {
        let mut store = ControlStateStore::new();
        store.apply_local(&ControlIntent::SetVolume(Track::Instrumental, 0.9));

        let changes = store
            .apply_remote(&ServerMessage::control_updated(ControlUpdate::InstrumentalVolume(0.3)))
            .unwrap();
        assert_eq!(
            changes,
            vec![StoreChange::Control(ControlUpdate::InstrumentalVolume(0.3))]
        );
        assert!((store.session().instrumental_volume - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_seek_always_reported() {
        let mut store = ControlStateStore::new();
        assert_eq!(
            store.apply_local(&ControlIntent::Seek(10.0)),
            vec![StoreChange::Seek(10.0)]
        );
        assert_eq!(
            store.apply_remote(&ServerMessage::PlaybackSeek { time: 10.0 }).unwrap(),
            vec![StoreChange::Seek(10.0)]
        );
    }

    #[test]
    fn test_heartbeat_only_updates_progress() {
        let mut store = ControlStateStore::new();
        let before = store.session().clone();

        let changes = store
            .apply_remote(&ServerMessage::PlayerStateUpdated {
                is_playing: true,
                current_time: 42.0,
                duration: 180.0,
            })
            .unwrap();
        assert!(changes.is_empty());
        assert_eq!(store.session(), &before);
        assert_eq!(store.progress().current_time, 42.0);
        assert!(store.progress().is_playing);
    }

    #[test]
    fn test_snapshot_reports_differences() {
        let mut store = ControlStateStore::new();
        let snapshot = PerformanceSession {
            song_id: Some("7".into()),
            is_playing: true,
            current_time: 12.0,
            duration: 200.0,
            vocal_volume: 0.2,
            ..Default::default()
        };

        let changes = store.apply_snapshot(snapshot.clone());
        assert_eq!(
            changes,
            vec![
                StoreChange::Song("7".into()),
                StoreChange::Control(ControlUpdate::VocalVolume(0.2)),
                StoreChange::Position(12.0),
                StoreChange::Playing(true),
            ]
        );
        assert_eq!(store.progress().duration, 200.0);

        // Same snapshot again (e.g. after reconnect) changes nothing
        assert!(store.apply_snapshot(snapshot).is_empty());
    }

    #[test]
    fn test_set_song_resets_transport() {
        let mut store = ControlStateStore::new();
        store.apply_local(&ControlIntent::Play);
        store.apply_local(&ControlIntent::Seek(30.0));

        let changes = store
            .apply_remote(&ServerMessage::PlaybackSetSong { song_id: "9".into() })
            .unwrap();
        assert_eq!(changes, vec![StoreChange::Song("9".into())]);
        assert!(!store.is_playing());
        assert_eq!(store.session().current_time, 0.0);
    }

    #[test]
    fn test_invalid_remote_control_is_error() {
        let mut store = ControlStateStore::new();
        let msg = ServerMessage::ControlUpdated {
            control: ControlField::LyricsSize,
            value: kms_common::protocol::ControlValue::Number(3.0),
        };
        assert!(store.apply_remote(&msg).is_err());
    }
}
