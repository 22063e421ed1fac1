//! Playback heartbeat
//!
//! The device that renders audio reports its clock-derived position to the
//! relay so passive devices can show progress and late joiners get a recent
//! `current_time`. Heartbeats are informational only; missing one never
//! corrupts state.

use kms_common::ClientMessage;
use std::time::Duration;

use crate::audio::engine::AudioGraphEngine;

/// Default heartbeat period
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(300);

/// Builds `update_player_state` frames from the engine
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    sent: u64,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self { interval, sent: 0 }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Frames produced so far
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Periodic frame; only produced while playing
    pub fn tick(&mut self, engine: &AudioGraphEngine) -> Option<ClientMessage> {
        if !engine.is_playing() {
            return None;
        }
        Some(self.report(engine))
    }

    /// Unconditional frame, sent right after a transport change
    pub fn report(&mut self, engine: &AudioGraphEngine) -> ClientMessage {
        self.sent += 1;
        ClientMessage::UpdatePlayerState {
            is_playing: engine.is_playing(),
            current_time: engine.elapsed(),
            duration: engine.duration(),
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::OfflineBackend;
    use crate::audio::types::{LoadedTracks, TrackBuffer};
    use std::sync::Arc;

    #[test]
    fn test_heartbeat_only_while_playing() {
        let backend = OfflineBackend::new(1000);
        let mut engine = AudioGraphEngine::new(Box::new(backend.clone()));
        let mut heartbeat = Heartbeat::default();
        assert_eq!(heartbeat.interval(), Duration::from_millis(300));
        assert!(heartbeat.tick(&engine).is_none());

        let ticket = engine.begin_load("1");
        let buffer = Arc::new(TrackBuffer::silence(10_000, 1000));
        engine
            .complete_load(
                &ticket,
                Ok(LoadedTracks {
                    song_id: "1".into(),
                    vocal: Arc::clone(&buffer),
                    instrumental: buffer,
                }),
            )
            .unwrap();
        assert!(heartbeat.tick(&engine).is_none());

        engine.play(1.0).unwrap();
        backend.advance(0.5);
        assert_eq!(
            heartbeat.tick(&engine),
            Some(ClientMessage::UpdatePlayerState {
                is_playing: true,
                current_time: 1.5,
                duration: 10.0,
            })
        );

        engine.pause().unwrap();
        assert!(heartbeat.tick(&engine).is_none());
        assert!(matches!(
            heartbeat.report(&engine),
            ClientMessage::UpdatePlayerState { is_playing: false, .. }
        ));
        assert_eq!(heartbeat.sent(), 2);
    }
}
