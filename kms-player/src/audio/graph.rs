//! Render graph shared between the control loop and the audio thread
//!
//! ```text
//! vocal TrackPlayer ──> vocal gain ────────┐
//!                                          ├──> analyser ──> output
//! instrumental TrackPlayer ──> inst gain ──┘
//! ```
//!
//! `TrackPlayer`s are one-shot: built, started once at a frame and offset,
//! and consumed when stopped. Pause and seek replace the whole pair.
//!
//! The graph owns the hardware frame counter. `start_pair` reads it under
//! the players lock. The render callback never blocks on that lock: if the
//! control thread holds it, the block is rendered as silence and the counter
//! still advances, so positions stay frame-exact.

use kms_common::session::clamp_volume;
use kms_common::Track;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use super::types::TrackBuffer;
use crate::error::{Error, Result};

/// Number of mixed mono samples kept for waveform snapshots
pub const ANALYSER_SIZE: usize = 2048;

/// Lock-free gain value readable from the audio thread
#[derive(Debug, Clone)]
pub struct GainParam(Arc<AtomicU32>);

impl GainParam {
    pub fn new(value: f32) -> Self {
        Self(Arc::new(AtomicU32::new(clamp_volume(value).to_bits())))
    }

    /// Takes effect on the next rendered frame
    pub fn set(&self, value: f32) {
        self.0.store(clamp_volume(value).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// When and where a started player reads its buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSchedule {
    /// Hardware frame at which buffer position `offset_frame` is rendered
    pub start_frame: u64,
    pub offset_frame: u64,
}

/// One-shot player for a single stem
pub struct TrackPlayer {
    track: Track,
    buffer: Arc<TrackBuffer>,
    gain: GainParam,
    schedule: Option<PlayerSchedule>,
}

impl TrackPlayer {
    pub fn new(track: Track, buffer: Arc<TrackBuffer>, gain: GainParam) -> Self {
        Self {
            track,
            buffer,
            gain,
            schedule: None,
        }
    }

    /// Start rendering `offset_frame` at hardware frame `start_frame`
    ///
    /// A player can be started exactly once.
    pub fn start(&mut self, start_frame: u64, offset_frame: u64) -> Result<()> {
        if self.schedule.is_some() {
            return Err(Error::InvalidState(format!(
                "{} player already started",
                self.track
            )));
        }
        self.schedule = Some(PlayerSchedule {
            start_frame,
            offset_frame,
        });
        Ok(())
    }

    /// Stop and discard the player
    pub fn stop(self) -> Option<PlayerSchedule> {
        self.schedule
    }

    pub fn track(&self) -> Track {
        self.track
    }

    pub fn schedule(&self) -> Option<PlayerSchedule> {
        self.schedule
    }

    /// Gained stereo sample for hardware frame `frame`
    fn sample(&self, frame: u64) -> (f32, f32) {
        let Some(schedule) = self.schedule else {
            return (0.0, 0.0);
        };
        if frame < schedule.start_frame {
            return (0.0, 0.0);
        }
        let position = schedule.offset_frame + (frame - schedule.start_frame);
        match usize::try_from(position).ok().and_then(|p| self.buffer.frame(p)) {
            Some((l, r)) => {
                let gain = self.gain.get();
                (l * gain, r * gain)
            }
            None => (0.0, 0.0),
        }
    }
}

/// The vocal and instrumental players of one play interval
pub struct PlayerPair {
    vocal: TrackPlayer,
    instrumental: TrackPlayer,
}

impl PlayerPair {
    pub fn new(vocal: TrackPlayer, instrumental: TrackPlayer) -> Self {
        Self {
            vocal,
            instrumental,
        }
    }

    /// Start both players with the identical frame and offset
    fn start(&mut self, start_frame: u64, offset_frame: u64) -> Result<()> {
        self.vocal.start(start_frame, offset_frame)?;
        self.instrumental.start(start_frame, offset_frame)
    }

    fn mix(&self, frame: u64) -> (f32, f32) {
        let (vl, vr) = self.vocal.sample(frame);
        let (il, ir) = self.instrumental.sample(frame);
        (vl + il, vr + ir)
    }

    /// (vocal, instrumental) schedules
    pub fn schedules(&self) -> (Option<PlayerSchedule>, Option<PlayerSchedule>) {
        (self.vocal.schedule(), self.instrumental.schedule())
    }

    fn stop(self) {
        self.vocal.stop();
        self.instrumental.stop();
    }
}

/// Time-domain tap on the mixed output
pub struct Analyser {
    ring: Vec<f32>,
    next: usize,
}

impl Analyser {
    pub fn new(size: usize) -> Self {
        Self {
            ring: vec![0.0; size.max(1)],
            next: 0,
        }
    }

    fn push(&mut self, sample: f32) {
        self.ring[self.next] = sample;
        self.next = (self.next + 1) % self.ring.len();
    }

    /// Oldest-first byte snapshot; 128 is silence
    pub fn byte_time_domain(&self) -> Vec<u8> {
        let (newer, older) = self.ring.split_at(self.next);
        older
            .iter()
            .chain(newer)
            .map(|&s| (128.0 * (1.0 + s)).clamp(0.0, 255.0) as u8)
            .collect()
    }

    fn clear(&mut self) {
        self.ring.iter_mut().for_each(|s| *s = 0.0);
        self.next = 0;
    }
}

/// Installed players, hardware frame clock and analyser
pub struct RenderGraph {
    sample_rate: u32,
    frames_rendered: AtomicU64,
    players: Mutex<Option<PlayerPair>>,
    analyser: Mutex<Analyser>,
}

impl RenderGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: AtomicU64::new(0),
            players: Mutex::new(None),
            analyser: Mutex::new(Analyser::new(ANALYSER_SIZE)),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames delivered to the device so far
    pub fn current_frame(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }

    /// Hardware clock in seconds
    pub fn current_time(&self) -> f64 {
        self.current_frame() as f64 / self.sample_rate as f64
    }

    pub fn seconds_to_frames(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Start `pair` at the next rendered frame, replacing any installed pair
    ///
    /// Returns the start frame.
    pub fn start_pair(&self, mut pair: PlayerPair, offset_seconds: f64) -> Result<u64> {
        let mut slot = lock(&self.players);
        let start_frame = self.current_frame();
        pair.start(start_frame, self.seconds_to_frames(offset_seconds))?;
        if let Some(previous) = slot.replace(pair) {
            previous.stop();
        }
        Ok(start_frame)
    }

    /// Stop and discard the installed pair
    ///
    /// Returns the first frame the pair did not render, or None when no pair
    /// was installed.
    pub fn stop_pair(&self) -> Option<u64> {
        let mut slot = lock(&self.players);
        let pair = slot.take()?;
        pair.stop();
        Some(self.current_frame())
    }

    pub fn schedules(&self) -> Option<(Option<PlayerSchedule>, Option<PlayerSchedule>)> {
        lock(&self.players).as_ref().map(PlayerPair::schedules)
    }

    pub fn waveform(&self) -> Vec<u8> {
        lock(&self.analyser).byte_time_domain()
    }

    pub fn clear_analyser(&self) {
        lock(&self.analyser).clear();
    }

    /// Fill an interleaved output buffer and advance the frame clock
    ///
    /// Called from the audio thread. Channels beyond the first two are
    /// written as silence.
    pub fn render(&self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        let players = try_lock(&self.players);
        let mut analyser = try_lock(&self.analyser);
        let pair = players.as_deref().and_then(Option::as_ref);
        let base = self.current_frame();

        let mut rendered = 0u64;
        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            let (left, right) = match pair {
                Some(pair) => pair.mix(base + i as u64),
                None => (0.0, 0.0),
            };
            frame.fill(0.0);
            frame[0] = left.clamp(-1.0, 1.0);
            if channels > 1 {
                frame[1] = right.clamp(-1.0, 1.0);
            }
            if let Some(analyser) = analyser.as_mut() {
                analyser.push((left + right) * 0.5);
            }
            rendered += 1;
        }

        self.frames_rendered.fetch_add(rendered, Ordering::AcqRel);
    }
}

/// Audio thread must keep running even if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Non-blocking variant for the audio thread; None while contended
fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}
