//! Device controller
//!
//! Composes one store, one control sink, one track source, the event bus and
//! (for the stage role) one audio engine, all injected by the caller. A
//! single control loop owns every piece of mutable state:
//!
//! - console commands become local intents (optimistic, then sent)
//! - relay frames are reconciled through the store
//! - finished loads are installed if still current
//! - the ticker checks for end of song, sends heartbeats and publishes
//!   progress
//!
//! The loop never awaits the network or a decoder directly; loads run as
//! spawned tasks and come back as `LoadCompletion`s.

use chrono::Utc;
use kms_common::events::{EventBus, KmsEvent, TransportStatus};
use kms_common::protocol::{ClientMessage, ControlUpdate};
use kms_common::{ControlIntent, Track};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::audio::engine::{fetch_and_decode, AudioGraphEngine, LoadOutcome, LoadTicket};
use crate::audio::types::LoadedTracks;
use crate::channel::{ChannelEvent, ControlSink};
use crate::error::{DecodeError, Error, Result};
use crate::heartbeat::Heartbeat;
use crate::source::TrackSource;
use crate::state::has_buffers;
use crate::store::{ControlStateStore, StoreChange};

/// Snapshot positions closer than this to the local clock are not applied
pub const RESYNC_TOLERANCE_SECS: f64 = 0.5;

/// What a device does in the performance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Renders audio and reports progress
    #[default]
    Stage,
    /// Issues commands, no audio
    Controller,
    /// Read-only display
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Stage => "stage",
            Role::Controller => "controller",
            Role::Viewer => "viewer",
        }
    }

    pub fn has_audio(&self) -> bool {
        matches!(self, Role::Stage)
    }

    pub fn can_control(&self) -> bool {
        !matches!(self, Role::Viewer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stage" => Ok(Role::Stage),
            "controller" => Ok(Role::Controller),
            "viewer" => Ok(Role::Viewer),
            other => Err(Error::Config(format!("unknown role '{}'", other))),
        }
    }
}

/// Input from the local console
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Intent(ControlIntent),
    Quit,
}

/// Result of a background load
#[derive(Debug)]
pub struct LoadCompletion {
    pub ticket: LoadTicket,
    pub result: std::result::Result<LoadedTracks, DecodeError>,
}

/// One device taking part in a performance
pub struct Device {
    role: Role,
    engine: Option<AudioGraphEngine>,
    store: ControlStateStore,
    sink: Box<dyn ControlSink>,
    source: Arc<dyn TrackSource>,
    events: Arc<EventBus>,
    heartbeat: Heartbeat,
    loads_tx: mpsc::UnboundedSender<LoadCompletion>,
    loads_rx: Option<mpsc::UnboundedReceiver<LoadCompletion>>,
    last_status: TransportStatus,
}

impl Device {
    /// Assemble a device; the stage role requires an engine, others forbid one
    pub fn new(
        role: Role,
        engine: Option<AudioGraphEngine>,
        sink: Box<dyn ControlSink>,
        source: Arc<dyn TrackSource>,
        events: Arc<EventBus>,
        heartbeat: Heartbeat,
    ) -> Result<Self> {
        match (role.has_audio(), engine.is_some()) {
            (true, false) => {
                return Err(Error::Config(format!("{} role requires an audio engine", role)))
            }
            (false, true) => {
                return Err(Error::Config(format!("{} role has no audio output", role)))
            }
            _ => {}
        }

        let (loads_tx, loads_rx) = mpsc::unbounded_channel();
        Ok(Self {
            role,
            engine,
            store: ControlStateStore::new(),
            sink,
            source,
            events,
            heartbeat,
            loads_tx,
            loads_rx: Some(loads_rx),
            last_status: TransportStatus::Idle,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn store(&self) -> &ControlStateStore {
        &self.store
    }

    pub fn engine(&self) -> Option<&AudioGraphEngine> {
        self.engine.as_ref()
    }

    /// Transport status of the local engine (idle for passive roles)
    pub fn status(&self) -> TransportStatus {
        self.engine
            .as_ref()
            .map(AudioGraphEngine::status)
            .unwrap_or_default()
    }

    /// Apply a local user action and announce it to the performance
    pub fn handle_intent(&mut self, intent: ControlIntent) -> Result<()> {
        if !self.role.can_control() {
            return Err(Error::InvalidState(format!(
                "{} devices are read-only",
                self.role
            )));
        }
        debug!(intent = ?intent, "Local intent");

        let changes = self.store.apply_local(&intent);
        self.sink.send(intent.to_message());
        self.apply_changes(changes, false);
        Ok(())
    }

    /// Reconcile a channel event
    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::StateChanged(state) => {
                info!(state = ?state, "Session channel state changed");
                self.events.emit_lossy(KmsEvent::ConnectionChanged {
                    state,
                    timestamp: Utc::now(),
                });
            }
            ChannelEvent::Message(message) => match self.store.apply_remote(&message) {
                Ok(changes) => self.apply_changes(changes, true),
                Err(e) => warn!("Ignoring relay frame {}: {}", message.kind(), e),
            },
        }
    }

    /// Install a finished load if it is still the current target
    pub fn handle_load_completion(&mut self, completion: LoadCompletion) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let song_id = completion.ticket.song_id().to_string();

        match engine.complete_load(&completion.ticket, completion.result) {
            Ok(LoadOutcome::Stale) => {}
            Ok(LoadOutcome::Ready { duration }) => {
                self.events.emit_lossy(KmsEvent::SongLoaded {
                    song_id,
                    duration,
                    timestamp: Utc::now(),
                });

                // Catch up with whatever the performance did meanwhile
                let session = self.store.session();
                if session.current_time > 0.0 {
                    if let Err(e) = engine.seek(session.current_time) {
                        warn!("Catch-up seek failed: {}", e);
                    }
                }
                let catch_up_play = session.is_playing;
                if catch_up_play {
                    if let Err(e) = engine.resume() {
                        warn!("Catch-up play failed: {}", e);
                    }
                }
                self.sync_status();
                if catch_up_play {
                    self.report_position();
                }
            }
            Err(e) => {
                self.events.emit_lossy(KmsEvent::SongLoadFailed {
                    song_id,
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
                self.sync_status();
            }
        }
    }

    /// Periodic work: end of song, heartbeat, progress
    pub fn tick(&mut self) {
        let finished = self
            .engine
            .as_mut()
            .map(AudioGraphEngine::check_finished)
            .unwrap_or(false);

        if finished {
            if let Some(song_id) = self.store.session().song_id.clone() {
                self.events.emit_lossy(KmsEvent::SongEnded {
                    song_id,
                    timestamp: Utc::now(),
                });
            }
            // Stop every device, not just this one
            let changes = self.store.apply_local(&ControlIntent::Pause);
            self.sink.send(ClientMessage::PlaybackPause);
            self.apply_changes(changes, false);
        }

        if let Some(engine) = self.engine.as_ref() {
            if let Some(message) = self.heartbeat.tick(engine) {
                self.sink.send(message);
            }
        }

        self.sync_status();
        self.emit_progress();
    }

    /// Wait for the next background load and install it
    ///
    /// For callers driving the device without `run`.
    pub async fn settle_load(&mut self) -> bool {
        let Some(loads) = self.loads_rx.as_mut() else {
            return false;
        };
        let next = loads.recv().await;
        match next {
            Some(completion) => {
                self.handle_load_completion(completion);
                true
            }
            None => false,
        }
    }

    /// Run the control loop until `Quit` or the command source closes
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<DeviceCommand>,
        mut channel: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Result<()> {
        let mut loads = self
            .loads_rx
            .take()
            .ok_or_else(|| Error::InvalidState("device loop already started".to_string()))?;

        let mut ticker = tokio::time::interval(self.heartbeat.interval());
        // Late ticks are dropped, not bunched; position never depends on them
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut channel_open = true;
        info!(role = %self.role, "Device running");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(DeviceCommand::Intent(intent)) => {
                        if let Err(e) = self.handle_intent(intent) {
                            warn!("{}", e);
                        }
                    }
                    Some(DeviceCommand::Quit) | None => break,
                },
                event = channel.recv(), if channel_open => match event {
                    Some(event) => self.handle_channel_event(event),
                    None => {
                        warn!("Session channel closed");
                        channel_open = false;
                    }
                },
                Some(completion) = loads.recv() => self.handle_load_completion(completion),
                _ = ticker.tick() => self.tick(),
            }
        }

        if let Some(engine) = self.engine.as_mut() {
            engine.cleanup();
        }
        info!("Device stopped");
        Ok(())
    }

    fn apply_changes(&mut self, changes: Vec<StoreChange>, remote: bool) {
        let mut transport_changed = false;

        for change in changes {
            match change {
                StoreChange::Song(song_id) => {
                    info!(song_id = %song_id, remote = remote, "Song selected");
                    self.start_load(&song_id);
                }
                StoreChange::Playing(playing) => {
                    transport_changed = true;
                    if let Some(engine) = self.engine.as_mut() {
                        let result = if !has_buffers(engine.status()) {
                            // Applied when the load completes
                            Ok(())
                        } else if playing {
                            engine.resume()
                        } else {
                            engine.pause()
                        };
                        if let Err(e) = result {
                            warn!("Transport change failed: {}", e);
                        }
                    }
                }
                StoreChange::Seek(time) => {
                    transport_changed = true;
                    if let Some(engine) = self.engine.as_mut() {
                        if has_buffers(engine.status()) {
                            if let Err(e) = engine.seek(time) {
                                warn!("Seek failed: {}", e);
                            }
                        }
                    }
                }
                StoreChange::Position(time) => {
                    if let Some(engine) = self.engine.as_mut() {
                        let drift = (engine.elapsed() - time).abs();
                        if has_buffers(engine.status()) && drift > RESYNC_TOLERANCE_SECS {
                            debug!(time = time, drift = drift, "Resyncing to snapshot position");
                            if let Err(e) = engine.seek(time) {
                                warn!("Resync failed: {}", e);
                            }
                        }
                    }
                }
                StoreChange::Control(update) => {
                    if let Some(engine) = self.engine.as_mut() {
                        match update {
                            ControlUpdate::VocalVolume(v) => engine.set_volume(Track::Vocal, v),
                            ControlUpdate::InstrumentalVolume(v) => {
                                engine.set_volume(Track::Instrumental, v)
                            }
                            ControlUpdate::LyricsSize(_) | ControlUpdate::LyricsOffset(_) => {}
                        }
                    }
                    self.events.emit_lossy(KmsEvent::ControlChanged {
                        update,
                        remote,
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        self.sync_status();
        if transport_changed {
            self.report_position();
        }
    }

    fn start_load(&mut self, song_id: &str) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let ticket = engine.begin_load(song_id);
        let sample_rate = engine.sample_rate();
        let source = Arc::clone(&self.source);
        let loads = self.loads_tx.clone();

        tokio::spawn(async move {
            let result = fetch_and_decode(source.as_ref(), ticket.song_id(), sample_rate).await;
            // Receiver gone means the device stopped
            let _ = loads.send(LoadCompletion { ticket, result });
        });
    }

    /// Send the engine's position right after a transport change
    ///
    /// Skipped while the engine has not caught up with the store, so the
    /// relay never sees a transient state.
    fn report_position(&mut self) {
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        if !has_buffers(engine.status()) || engine.is_playing() != self.store.is_playing() {
            return;
        }
        let message = self.heartbeat.report(engine);
        self.sink.send(message);
    }

    fn sync_status(&mut self) {
        let status = self.status();
        if status != self.last_status {
            debug!(old = %self.last_status, new = %status, "Transport status changed");
            self.events.emit_lossy(KmsEvent::TransportStatusChanged {
                old_status: self.last_status,
                new_status: status,
                timestamp: Utc::now(),
            });
            self.last_status = status;
        }
    }

    fn emit_progress(&self) {
        let (current_time, duration, playing) = match self.engine.as_ref() {
            Some(engine) => (engine.elapsed(), engine.duration(), engine.is_playing()),
            None => {
                let progress = self.store.progress();
                (progress.current_time, progress.duration, progress.is_playing)
            }
        };
        self.events.emit_lossy(KmsEvent::PlaybackProgress {
            song_id: self.store.session().song_id.clone(),
            current_time,
            duration,
            playing,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("Stage".parse::<Role>().unwrap(), Role::Stage);
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert!("dj".parse::<Role>().is_err());
        assert!(Role::Controller.can_control());
        assert!(!Role::Viewer.can_control());
        assert!(!Role::Controller.has_audio());
    }
}
