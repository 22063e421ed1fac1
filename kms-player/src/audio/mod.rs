//! Audio pipeline: decode, resample, mix and output

pub mod backend;
pub mod clock;
pub mod decode;
pub mod engine;
pub mod graph;
pub mod resampler;
pub mod types;

pub use backend::{AudioBackend, CpalBackend, OfflineBackend};
pub use clock::PlaybackClock;
pub use engine::{AudioGraphEngine, LoadOutcome, LoadTicket};
pub use graph::RenderGraph;
pub use types::{LoadedTracks, TrackBuffer};
