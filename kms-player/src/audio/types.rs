//! Core audio data types
//!
//! Decoded stems are held fully in RAM so both players can start at any
//! sample offset without seeking the source.

use std::sync::Arc;

/// Output channel count of every decoded stem
pub const CHANNELS: usize = 2;

/// One fully decoded stem
///
/// **Format:**
/// - Samples are f32 (floating point -1.0 to 1.0)
/// - Stereo interleaved: [L, R, L, R, ...]
/// - Sample rate equals the output device rate after resampling
#[derive(Debug, Clone)]
pub struct TrackBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl TrackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Buffer of `frames` silent stereo frames
    pub fn silence(frames: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; frames * CHANNELS], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Stereo frame at `index`, or None past the end
    pub fn frame(&self, index: usize) -> Option<(f32, f32)> {
        let i = index.checked_mul(CHANNELS)?;
        match (self.samples.get(i), self.samples.get(i + 1)) {
            (Some(&l), Some(&r)) => Some((l, r)),
            _ => None,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// Both stems of one song, decoded at the device rate
#[derive(Debug, Clone)]
pub struct LoadedTracks {
    pub song_id: String,
    pub vocal: Arc<TrackBuffer>,
    pub instrumental: Arc<TrackBuffer>,
}
