//! # KMS Common Library
//!
//! Shared code for the karaoke multi-device sync services:
//! - Wire protocol between devices and the relay
//! - Canonical performance session model
//! - Event types (KmsEvent enum) and EventBus
//! - Configuration file resolution
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};
pub use protocol::{ClientMessage, ControlIntent, ControlUpdate, ServerMessage, Track};
pub use session::{LyricsSize, PerformanceSession};
