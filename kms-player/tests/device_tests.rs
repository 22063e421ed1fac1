//! Device controller tests
//!
//! Drive a device by hand (no run loop): channel events and intents go in,
//! recorded frames and bus events come out. Stage devices render through an
//! offline backend.

mod helpers;

use helpers::*;
use kms_common::events::{EventBus, KmsEvent, TransportStatus};
use kms_common::protocol::{ClientMessage, ControlUpdate, ServerMessage};
use kms_common::{ControlIntent, LyricsSize, PerformanceSession, Track};
use kms_player::audio::{AudioGraphEngine, OfflineBackend};
use kms_player::heartbeat::Heartbeat;
use kms_player::{ChannelEvent, Device, Error, MemoryTrackSource, Role};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Harness {
    device: Device,
    backend: OfflineBackend,
    sink: RecordingSink,
    events: broadcast::Receiver<KmsEvent>,
}

fn stage(source: MemoryTrackSource) -> Harness {
    let backend = OfflineBackend::new(TEST_SAMPLE_RATE);
    let engine = AudioGraphEngine::new(Box::new(backend.clone()));
    let sink = RecordingSink::new();
    let bus = Arc::new(EventBus::new(256));
    let events = bus.subscribe();
    let device = Device::new(
        Role::Stage,
        Some(engine),
        Box::new(sink.clone()),
        Arc::new(source),
        bus,
        Heartbeat::default(),
    )
    .unwrap();
    Harness {
        device,
        backend,
        sink,
        events,
    }
}

fn passive(role: Role) -> (Device, RecordingSink) {
    let sink = RecordingSink::new();
    let device = Device::new(
        role,
        None,
        Box::new(sink.clone()),
        Arc::new(MemoryTrackSource::new()),
        Arc::new(EventBus::new(16)),
        Heartbeat::default(),
    )
    .unwrap();
    (device, sink)
}

fn remote(message: ServerMessage) -> ChannelEvent {
    ChannelEvent::Message(message)
}

fn drain(rx: &mut broadcast::Receiver<KmsEvent>) -> Vec<KmsEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn control_changes(events: &[KmsEvent]) -> Vec<(ControlUpdate, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            KmsEvent::ControlChanged { update, remote, .. } => Some((*update, *remote)),
            _ => None,
        })
        .collect()
}

fn heartbeat_state(message: &ClientMessage) -> (bool, f64) {
    match message {
        ClientMessage::UpdatePlayerState {
            is_playing,
            current_time,
            ..
        } => (*is_playing, *current_time),
        other => panic!("expected heartbeat, got {:?}", other),
    }
}

async fn stage_with_song(song_secs: f64) -> Harness {
    let mut h = stage(song_source("1", song_secs, song_secs));
    h.device
        .handle_intent(ControlIntent::SetSong("1".into()))
        .unwrap();
    assert!(h.device.settle_load().await);
    assert_eq!(h.device.status(), TransportStatus::Ready);
    h.sink.take();
    drain(&mut h.events);
    h
}

#[tokio::test]
async fn test_late_joiner_adopts_snapshot() {
    let mut h = stage(song_source("1", 4.0, 4.0));

    let snapshot = PerformanceSession {
        song_id: Some("1".into()),
        vocal_volume: 0.2,
        lyrics_size: LyricsSize::Small,
        ..Default::default()
    };
    h.device
        .handle_channel_event(remote(ServerMessage::PerformanceState(snapshot)));

    assert!((h.device.store().session().vocal_volume - 0.2).abs() < 1e-6);
    assert_eq!(h.device.store().session().lyrics_size, LyricsSize::Small);
    let engine = h.device.engine().unwrap();
    assert!((engine.volume(Track::Vocal) - 0.2).abs() < 1e-6);
    assert_eq!(engine.status(), TransportStatus::Loading);

    let changes = control_changes(&drain(&mut h.events));
    assert!(changes.contains(&(ControlUpdate::VocalVolume(0.2), true)));
    assert!(changes.contains(&(ControlUpdate::LyricsSize(LyricsSize::Small), true)));

    assert!(h.device.settle_load().await);
    assert_eq!(h.device.status(), TransportStatus::Ready);
    // Joining never sends anything on its own
    assert!(h.sink.messages().is_empty());
}

#[tokio::test]
async fn test_late_joiner_catches_up_with_running_song() {
    let mut h = stage(song_source("1", 10.0, 10.0));

    let snapshot = PerformanceSession {
        song_id: Some("1".into()),
        is_playing: true,
        current_time: 3.0,
        duration: 10.0,
        ..Default::default()
    };
    h.device
        .handle_channel_event(remote(ServerMessage::PerformanceState(snapshot)));
    assert!(h.device.settle_load().await);

    let engine = h.device.engine().unwrap();
    assert_eq!(engine.status(), TransportStatus::Playing);
    assert!((engine.elapsed() - 3.0).abs() < 1e-3);

    h.backend.advance(1.0);
    assert!((h.device.engine().unwrap().elapsed() - 4.0).abs() < 1e-3);
}

#[tokio::test]
async fn test_replayed_control_is_idempotent() {
    let mut h = stage_with_song(4.0).await;
    let message = ServerMessage::control_updated(ControlUpdate::InstrumentalVolume(0.4));

    h.device.handle_channel_event(remote(message.clone()));
    let before = h.device.store().session().clone();
    assert_eq!(control_changes(&drain(&mut h.events)).len(), 1);

    h.device.handle_channel_event(remote(message));
    assert_eq!(h.device.store().session(), &before);
    assert!(control_changes(&drain(&mut h.events)).is_empty());
    assert!(h.sink.messages().is_empty());
}

#[tokio::test]
async fn test_viewer_is_read_only() {
    let (mut viewer, sink) = passive(Role::Viewer);

    let err = viewer.handle_intent(ControlIntent::Play).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert!(sink.messages().is_empty());
    assert!(!viewer.store().is_playing());

    // Still follows the performance
    viewer.handle_channel_event(remote(ServerMessage::PlaybackPlay));
    assert!(viewer.store().is_playing());
}

#[tokio::test]
async fn test_controller_forwards_intents() {
    let (mut controller, sink) = passive(Role::Controller);

    controller
        .handle_intent(ControlIntent::SetVolume(Track::Vocal, 0.3))
        .unwrap();
    controller.handle_intent(ControlIntent::Seek(12.0)).unwrap();

    assert_eq!(
        sink.messages(),
        vec![
            ClientMessage::control(ControlUpdate::VocalVolume(0.3)),
            ClientMessage::PlaybackSeek { time: 12.0 },
        ]
    );
    assert!((controller.store().session().vocal_volume - 0.3).abs() < 1e-6);
    assert_eq!(controller.status(), TransportStatus::Idle);
}

#[tokio::test]
async fn test_passive_progress_comes_from_heartbeats() {
    let (mut viewer, _sink) = passive(Role::Viewer);
    viewer.handle_channel_event(remote(ServerMessage::PlayerStateUpdated {
        is_playing: true,
        current_time: 42.0,
        duration: 180.0,
    }));

    let progress = viewer.store().progress();
    assert_eq!(progress.current_time, 42.0);
    assert_eq!(progress.duration, 180.0);
    assert!(!viewer.store().is_playing());
}

#[tokio::test]
async fn test_play_before_load_completes_is_deferred() {
    let mut h = stage(song_source("1", 2.0, 2.0));

    h.device
        .handle_intent(ControlIntent::SetSong("1".into()))
        .unwrap();
    h.device.handle_intent(ControlIntent::Play).unwrap();
    assert_eq!(h.device.status(), TransportStatus::Loading);
    assert_eq!(
        h.sink.take(),
        vec![
            ClientMessage::PlaybackSetSong { song_id: "1".into() },
            ClientMessage::PlaybackPlay,
        ]
    );

    assert!(h.device.settle_load().await);
    assert_eq!(h.device.status(), TransportStatus::Playing);

    let sent = h.sink.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(heartbeat_state(&sent[0]), (true, 0.0));
}

#[tokio::test]
async fn test_stale_load_is_discarded() {
    let source = song_source("slow", 9.0, 9.0);
    add_song(&source, "fast", 2.0, 2.0);
    source.set_delay("slow", Duration::from_millis(200));
    let mut h = stage(source);

    h.device
        .handle_intent(ControlIntent::SetSong("slow".into()))
        .unwrap();
    h.device
        .handle_intent(ControlIntent::SetSong("fast".into()))
        .unwrap();

    assert!(h.device.settle_load().await);
    assert!(h.device.settle_load().await);

    let engine = h.device.engine().unwrap();
    assert_eq!(engine.status(), TransportStatus::Ready);
    assert_eq!(engine.song_id(), Some("fast"));
    assert!((engine.duration() - 2.0).abs() < 1e-3);

    let loaded: Vec<String> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            KmsEvent::SongLoaded { song_id, .. } => Some(song_id),
            _ => None,
        })
        .collect();
    assert_eq!(loaded, vec!["fast".to_string()]);
}

#[tokio::test]
async fn test_failed_load_reports_error() {
    let mut h = stage(MemoryTrackSource::new());

    h.device
        .handle_intent(ControlIntent::SetSong("404".into()))
        .unwrap();
    assert!(h.device.settle_load().await);
    assert_eq!(h.device.status(), TransportStatus::Error);

    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, KmsEvent::SongLoadFailed { song_id, .. } if song_id == "404")));

    // A later play does nothing until a song loads
    h.device.handle_intent(ControlIntent::Play).unwrap();
    assert_eq!(h.device.status(), TransportStatus::Error);
}

#[tokio::test]
async fn test_remote_pause_stops_stage_and_reports() {
    let mut h = stage_with_song(10.0).await;

    h.device.handle_intent(ControlIntent::Play).unwrap();
    h.backend.advance(2.0);
    h.sink.take();

    h.device
        .handle_channel_event(remote(ServerMessage::PlaybackPause));
    assert_eq!(h.device.status(), TransportStatus::Paused);

    let sent = h.sink.take();
    assert_eq!(sent.len(), 1);
    let (playing, time) = heartbeat_state(&sent[0]);
    assert!(!playing);
    assert!((time - 2.0).abs() < 1e-3);
}

#[tokio::test]
async fn test_heartbeat_only_while_playing() {
    let mut h = stage_with_song(10.0).await;

    h.device.tick();
    assert!(h.sink.heartbeats().is_empty());

    h.device.handle_intent(ControlIntent::Play).unwrap();
    h.sink.take();
    h.backend.advance(0.3);
    h.device.tick();

    let sent = h.sink.take();
    assert_eq!(sent.len(), 1);
    let (playing, time) = heartbeat_state(&sent[0]);
    assert!(playing);
    assert!((time - 0.3).abs() < 1e-3);
}

#[tokio::test]
async fn test_snapshot_position_resyncs_only_on_drift() {
    let mut h = stage_with_song(20.0).await;
    h.device.handle_intent(ControlIntent::Play).unwrap();
    h.backend.advance(5.0);

    let mut snapshot = h.device.store().session().clone();
    snapshot.current_time = 5.2;
    h.device
        .handle_channel_event(remote(ServerMessage::PerformanceState(snapshot.clone())));
    let (vocal, _) = h.device.engine().unwrap().player_schedules().unwrap();
    assert_eq!(vocal.unwrap().start_frame, 0);

    snapshot.current_time = 9.0;
    h.device
        .handle_channel_event(remote(ServerMessage::PerformanceState(snapshot)));
    let engine = h.device.engine().unwrap();
    let (vocal, _) = engine.player_schedules().unwrap();
    assert_eq!(vocal.unwrap().start_frame, 5 * TEST_SAMPLE_RATE as u64);
    assert!((engine.elapsed() - 9.0).abs() < 1e-3);
}

#[tokio::test]
async fn test_song_end_pauses_everyone() {
    let mut h = stage_with_song(1.0).await;
    h.device.handle_intent(ControlIntent::Play).unwrap();
    h.sink.take();

    h.backend.advance(1.1);
    h.device.tick();

    assert!(!h.device.store().is_playing());
    assert_eq!(h.device.status(), TransportStatus::Paused);
    let sent = h.sink.take();
    assert_eq!(sent[0], ClientMessage::PlaybackPause);
    assert_eq!(heartbeat_state(&sent[1]), (false, 1.0));

    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, KmsEvent::SongEnded { song_id, .. } if song_id == "1")));
}

#[tokio::test]
async fn test_role_engine_mismatch_rejected() {
    let result = Device::new(
        Role::Stage,
        None,
        Box::new(RecordingSink::new()),
        Arc::new(MemoryTrackSource::new()),
        Arc::new(EventBus::new(16)),
        Heartbeat::default(),
    );
    assert!(matches!(result, Err(Error::Config(_))));
}
