//! # KMS Player Library (kms-player)
//!
//! One device of a synchronized karaoke performance.
//!
//! **Purpose:** Mirror the performance's shared controls, render the vocal
//! and instrumental stems in lockstep (stage role) and report playback
//! progress to the relay.
//!
//! **Architecture:** symphonia + rubato decode into memory, a two-player
//! render graph mixed on the cpal callback, and a WebSocket session channel
//! to kms-relay.

pub mod audio;
pub mod channel;
pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod heartbeat;
pub mod source;
pub mod state;
pub mod store;

pub use audio::AudioGraphEngine;
pub use channel::{ChannelEvent, ControlSink, ReconnectPolicy, SessionChannel};
pub use device::{Device, DeviceCommand, Role};
pub use error::{DecodeError, Error, Result};
pub use source::{HttpTrackSource, MemoryTrackSource, TrackSource};
pub use store::{ControlStateStore, StoreChange};
