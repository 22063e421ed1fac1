//! Audio graph engine
//!
//! Owns the two decoded stems, their gains and the playback clock of one
//! device. Every play (including resume and seek) builds a fresh
//! `PlayerPair`; players are never paused and restarted.
//!
//! Loading is split so the control loop never waits on the network:
//! `begin_load` issues a `LoadTicket`, `fetch_and_decode` runs anywhere
//! without borrowing the engine, and `complete_load` installs the result
//! only if the ticket is still the current target. A slow load for an older
//! song can therefore never overwrite a newer one.

use bytes::Bytes;
use kms_common::events::TransportStatus;
use kms_common::session::clamp_time;
use kms_common::Track;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::backend::AudioBackend;
use super::clock::PlaybackClock;
use super::decode::decode_track;
use super::graph::{GainParam, PlayerPair, PlayerSchedule, TrackPlayer};
use super::types::{LoadedTracks, TrackBuffer};
use crate::error::{DecodeError, Error, Result};
use crate::source::TrackSource;
use crate::state::{has_buffers, transition, TransportEvent};

/// Stem lengths further apart than this are reported
const LENGTH_MISMATCH_WARN_SECS: f64 = 0.05;

/// Identifies one load request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    song_id: String,
    generation: u64,
}

impl LoadTicket {
    pub fn song_id(&self) -> &str {
        &self.song_id
    }
}

/// Result of `complete_load` for a successful fetch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOutcome {
    /// Buffers installed; duration of record in seconds
    Ready { duration: f64 },
    /// A newer load (or cleanup) superseded this one; result dropped
    Stale,
}

/// Fetch both stems concurrently, then decode both concurrently
///
/// Decoding runs on the blocking pool. Does not touch the engine.
pub async fn fetch_and_decode(
    source: &dyn TrackSource,
    song_id: &str,
    sample_rate: u32,
) -> std::result::Result<LoadedTracks, DecodeError> {
    let (vocal_bytes, instrumental_bytes) = tokio::try_join!(
        fetch(source, song_id, Track::Vocal),
        fetch(source, song_id, Track::Instrumental),
    )?;

    let (vocal, instrumental) = tokio::try_join!(
        decode(song_id, Track::Vocal, vocal_bytes, sample_rate),
        decode(song_id, Track::Instrumental, instrumental_bytes, sample_rate),
    )?;

    Ok(LoadedTracks {
        song_id: song_id.to_string(),
        vocal: Arc::new(vocal),
        instrumental: Arc::new(instrumental),
    })
}

async fn fetch(
    source: &dyn TrackSource,
    song_id: &str,
    track: Track,
) -> std::result::Result<Bytes, DecodeError> {
    source
        .fetch(song_id, track)
        .await
        .map_err(|e| DecodeError::Fetch {
            song_id: song_id.to_string(),
            track,
            message: e.to_string(),
        })
}

async fn decode(
    song_id: &str,
    track: Track,
    bytes: Bytes,
    sample_rate: u32,
) -> std::result::Result<TrackBuffer, DecodeError> {
    let message = match tokio::task::spawn_blocking(move || decode_track(bytes, sample_rate)).await {
        Ok(Ok(buffer)) => return Ok(buffer),
        Ok(Err(Error::Codec(message))) => message,
        Ok(Err(e)) => e.to_string(),
        Err(e) => format!("decoder task failed: {}", e),
    };
    Err(DecodeError::Decode {
        song_id: song_id.to_string(),
        track,
        message,
    })
}

/// Playback of one two-stem song on one device
pub struct AudioGraphEngine {
    backend: Box<dyn AudioBackend>,
    status: TransportStatus,
    tracks: Option<LoadedTracks>,
    vocal_gain: GainParam,
    instrumental_gain: GainParam,
    clock: PlaybackClock,
    generation: u64,
    pending: Option<LoadTicket>,
}

impl AudioGraphEngine {
    pub fn new(backend: Box<dyn AudioBackend>) -> Self {
        Self {
            backend,
            status: TransportStatus::Idle,
            tracks: None,
            vocal_gain: GainParam::new(1.0),
            instrumental_gain: GainParam::new(1.0),
            clock: PlaybackClock::default(),
            generation: 0,
            pending: None,
        }
    }

    pub fn status(&self) -> TransportStatus {
        self.status
    }

    pub fn is_playing(&self) -> bool {
        self.status == TransportStatus::Playing
    }

    /// Song loaded or being loaded
    pub fn song_id(&self) -> Option<&str> {
        match (&self.pending, &self.tracks) {
            (Some(ticket), _) => Some(ticket.song_id()),
            (None, Some(tracks)) => Some(&tracks.song_id),
            (None, None) => None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.backend.sample_rate()
    }

    /// Duration of record: the instrumental stem's length
    pub fn duration(&self) -> f64 {
        self.tracks
            .as_ref()
            .map(|t| t.instrumental.duration_seconds())
            .unwrap_or(0.0)
    }

    /// Clock anchor (`playback_start_time`, `playback_offset`)
    pub fn clock(&self) -> PlaybackClock {
        self.clock
    }

    pub fn volume(&self, track: Track) -> f32 {
        self.gain(track).get()
    }

    /// (vocal, instrumental) schedules of the installed pair
    pub fn player_schedules(&self) -> Option<(Option<PlayerSchedule>, Option<PlayerSchedule>)> {
        self.backend.graph().schedules()
    }

    /// Start loading `song_id`
    ///
    /// Stops playback and releases the previous buffers. Any load still in
    /// flight becomes stale.
    pub fn begin_load(&mut self, song_id: &str) -> LoadTicket {
        self.release();
        self.generation += 1;
        let ticket = LoadTicket {
            song_id: song_id.to_string(),
            generation: self.generation,
        };
        self.pending = Some(ticket.clone());
        self.status = TransportStatus::Loading;
        info!(song_id = song_id, generation = self.generation, "Loading song");
        ticket
    }

    /// Install the result of the load identified by `ticket`
    ///
    /// Failed loads move the engine to `error` and return the DecodeError.
    pub fn complete_load(
        &mut self,
        ticket: &LoadTicket,
        result: std::result::Result<LoadedTracks, DecodeError>,
    ) -> Result<LoadOutcome> {
        if self.pending.as_ref() != Some(ticket) {
            debug!(
                song_id = ticket.song_id(),
                generation = ticket.generation,
                "Discarding stale load result"
            );
            return Ok(LoadOutcome::Stale);
        }
        self.pending = None;

        match result {
            Ok(tracks) => {
                let vocal = tracks.vocal.duration_seconds();
                let instrumental = tracks.instrumental.duration_seconds();
                if (vocal - instrumental).abs() > LENGTH_MISMATCH_WARN_SECS {
                    warn!(
                        song_id = %tracks.song_id,
                        vocal_secs = vocal,
                        instrumental_secs = instrumental,
                        "Stem lengths differ; instrumental length is used"
                    );
                }
                self.tracks = Some(tracks);
                self.clock.reset();
                self.status = transition(self.status, TransportEvent::LoadSucceeded)?;
                info!(song_id = ticket.song_id(), duration = instrumental, "Song ready");
                Ok(LoadOutcome::Ready {
                    duration: instrumental,
                })
            }
            Err(e) => {
                self.status = transition(self.status, TransportEvent::LoadFailed)?;
                error!("{}", e);
                Err(e.into())
            }
        }
    }

    /// Fetch, decode and install `song_id` in one call
    pub async fn load(&mut self, source: &dyn TrackSource, song_id: &str) -> Result<()> {
        let ticket = self.begin_load(song_id);
        let result = fetch_and_decode(source, song_id, self.sample_rate()).await;
        self.complete_load(&ticket, result).map(|_| ())
    }

    /// Start both stems at song position `offset`
    ///
    /// No-op while already playing.
    pub fn play(&mut self, offset: f64) -> Result<()> {
        if self.status == TransportStatus::Playing {
            debug!("Already playing, ignoring play");
            return Ok(());
        }
        let next = transition(self.status, TransportEvent::Play)?;

        if self.backend.is_suspended() {
            self.backend.resume()?;
        }
        let offset = self.start_players(offset)?;
        self.status = next;
        info!(offset = offset, "Playback started");
        Ok(())
    }

    /// Play from the stored offset
    pub fn resume(&mut self) -> Result<()> {
        self.play(self.clock.offset())
    }

    /// Stop both stems and keep the position
    ///
    /// No-op when ready or already paused.
    pub fn pause(&mut self) -> Result<()> {
        if matches!(self.status, TransportStatus::Ready | TransportStatus::Paused) {
            debug!("Not playing, ignoring pause");
            return Ok(());
        }
        let next = transition(self.status, TransportEvent::Pause)?;
        let position = self.stop_players();
        self.status = next;
        info!(position = position, "Playback paused");
        Ok(())
    }

    /// Move to `time` (clamped to `[0, duration]`); returns the clamped time
    ///
    /// While playing the old pair is swapped for a new one in a single step.
    pub fn seek(&mut self, time: f64) -> Result<f64> {
        transition(self.status, TransportEvent::Seek)?;
        let target = clamp_time(time).min(self.duration());

        if self.status == TransportStatus::Playing {
            self.start_players(target)?;
        } else {
            self.clock.set_offset(target);
        }
        debug!(time = target, "Seek");
        Ok(target)
    }

    /// Set a stem's gain; immediate in every state
    pub fn set_volume(&mut self, track: Track, value: f32) {
        let gain = self.gain(track);
        gain.set(value);
        debug!(track = %track, volume = gain.get(), "Volume set");
    }

    /// Current song position in seconds
    pub fn elapsed(&self) -> f64 {
        self.clock.elapsed(self.backend.current_time())
    }

    /// Time-domain snapshot of the mixed output; None until a song is loaded
    pub fn waveform_sample(&self) -> Option<Vec<u8>> {
        if !has_buffers(self.status) {
            return None;
        }
        Some(self.backend.graph().waveform())
    }

    /// Pause at the end of the song once playback reaches it
    ///
    /// Returns true exactly once per end of song.
    pub fn check_finished(&mut self) -> bool {
        if self.status != TransportStatus::Playing {
            return false;
        }
        let duration = self.duration();
        if self.elapsed() < duration {
            return false;
        }

        self.stop_players();
        self.clock.set_offset(duration);
        self.status = TransportStatus::Paused;
        info!(song_id = ?self.song_id(), "Song finished");
        true
    }

    /// Release buffers and players and return to idle
    pub fn cleanup(&mut self) {
        self.release();
        // In-flight loads become stale
        self.generation += 1;
        self.pending = None;
        self.status = TransportStatus::Idle;
        debug!("Engine cleaned up");
    }

    fn gain(&self, track: Track) -> &GainParam {
        match track {
            Track::Vocal => &self.vocal_gain,
            Track::Instrumental => &self.instrumental_gain,
        }
    }

    /// Install a fresh pair at `offset` and anchor the clock to its start
    fn start_players(&mut self, offset: f64) -> Result<f64> {
        let tracks = self
            .tracks
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no song loaded".to_string()))?;
        let offset = clamp_time(offset).min(tracks.instrumental.duration_seconds());

        let pair = PlayerPair::new(
            TrackPlayer::new(Track::Vocal, Arc::clone(&tracks.vocal), self.vocal_gain.clone()),
            TrackPlayer::new(
                Track::Instrumental,
                Arc::clone(&tracks.instrumental),
                self.instrumental_gain.clone(),
            ),
        );

        let graph = self.backend.graph();
        let start_frame = graph.start_pair(pair, offset)?;
        self.clock
            .start(start_frame as f64 / graph.sample_rate() as f64, offset);
        Ok(offset)
    }

    /// Discard the installed pair and fold the interval into the offset
    fn stop_players(&mut self) -> f64 {
        let graph = self.backend.graph();
        let now = match graph.stop_pair() {
            Some(frame) => frame as f64 / graph.sample_rate() as f64,
            None => graph.current_time(),
        };
        let position = self.clock.stop(now).min(self.duration());
        self.clock.set_offset(position);
        position
    }

    fn release(&mut self) {
        let graph = self.backend.graph();
        graph.stop_pair();
        graph.clear_analyser();
        self.tracks = None;
        self.clock.reset();
    }
}
