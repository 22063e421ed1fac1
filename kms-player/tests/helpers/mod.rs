//! Test helpers for kms-player integration tests
//!
//! - audio_generator: in-memory WAV stems with known sample values
//! - test_relay: in-process kms-relay on an ephemeral port, plus a link
//!   that can be cut and restored
//! - RecordingSink: captures everything a device sends

#![allow(dead_code)]

pub mod audio_generator;
pub mod test_relay;

use kms_common::ClientMessage;
use kms_player::ControlSink;
use std::sync::{Arc, Mutex};

pub use audio_generator::{add_song, constant_wav, sine_wav, song_source, TEST_SAMPLE_RATE};
pub use test_relay::{spawn_relay, spawn_relay_with_registry, RelayLink};

/// Sink that records outbound frames instead of sending them
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<ClientMessage>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Drain recorded frames
    pub fn take(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn heartbeats(&self) -> Vec<ClientMessage> {
        self.messages()
            .into_iter()
            .filter(|m| matches!(m, ClientMessage::UpdatePlayerState { .. }))
            .collect()
    }
}

impl ControlSink for RecordingSink {
    fn send(&self, message: ClientMessage) {
        self.sent.lock().unwrap().push(message);
    }
}
