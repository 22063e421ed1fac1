//! Session registry
//!
//! Holds the single canonical `PerformanceSession` per performance and the
//! fan-out channel its members listen on. Every accepted intent mutates the
//! canonical copy first and is then rebroadcast tagged with its origin, so
//! each connection can skip its own messages.
//!
//! Rooms outlive their members: a device that reconnects after everyone
//! dropped still receives the converged state rather than defaults. A room
//! that stays empty longer than the idle TTL is evicted.

use kms_common::protocol::{ClientMessage, ControlUpdate, ServerMessage};
use kms_common::{Error, PerformanceSession, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// How long an empty room keeps its state by default
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(600);

/// How far ahead of the expected position a heartbeat may report
///
/// Covers heartbeat interval and network jitter. Anything further ahead was
/// sent before a backwards seek and is dropped.
pub const HEARTBEAT_SLACK_SECS: f64 = 2.0;

/// Identity of one device connection
pub type ConnectionId = Uuid;

/// A relay message plus the connection that caused it
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub origin: ConnectionId,
    pub message: ServerMessage,
}

/// Listing entry for one performance
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub session_id: String,
    pub members: usize,
    pub song_id: Option<String>,
    pub is_playing: bool,
}

struct Room {
    session: PerformanceSession,
    members: HashSet<ConnectionId>,
    tx: broadcast::Sender<Broadcast>,
    /// When `session.current_time` was last set
    progress_at: Instant,
    /// When the last member left
    empty_since: Option<Instant>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            session: PerformanceSession::default(),
            members: HashSet::new(),
            tx,
            progress_at: Instant::now(),
            empty_since: None,
        }
    }

    /// Latest position a current heartbeat could plausibly report
    fn progress_ceiling(&self) -> f64 {
        self.session.current_time + self.progress_at.elapsed().as_secs_f64() + HEARTBEAT_SLACK_SECS
    }

    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        match self.empty_since {
            Some(since) => self.members.is_empty() && now.duration_since(since) >= ttl,
            None => false,
        }
    }

    fn publish(&self, origin: ConnectionId, message: ServerMessage) {
        // No receivers is fine: the sender may be the only member
        let _ = self.tx.send(Broadcast { origin, message });
    }
}

/// Canonical state for every active performance
pub struct SessionRegistry {
    rooms: RwLock<HashMap<String, Room>>,
    capacity: usize,
    idle_ttl: Duration,
}

impl SessionRegistry {
    /// Create a registry whose per-room fan-out buffers `capacity` messages
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    /// Keep empty rooms for `ttl` before eviction
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Add a connection to a performance
    ///
    /// Idempotent for an existing member. Returns the current snapshot and a
    /// fresh subscription to the performance's fan-out.
    pub async fn join(
        &self,
        session_id: &str,
        conn: ConnectionId,
    ) -> (PerformanceSession, broadcast::Receiver<Broadcast>) {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(session_id.to_string())
            .or_insert_with(|| {
                info!("Creating performance {}", session_id);
                Room::new(self.capacity)
            });

        room.empty_since = None;
        if room.members.insert(conn) {
            info!(
                "Connection {} joined performance {} ({} members)",
                conn,
                session_id,
                room.members.len()
            );
        } else {
            debug!("Connection {} re-joined performance {}", conn, session_id);
        }

        (room.session.clone(), room.tx.subscribe())
    }

    /// Remove a connection from a performance (canonical state is kept)
    pub async fn leave(&self, session_id: &str, conn: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(session_id) {
            if room.members.remove(&conn) {
                info!(
                    "Connection {} left performance {} ({} members)",
                    conn,
                    session_id,
                    room.members.len()
                );
                if room.members.is_empty() {
                    room.empty_since = Some(Instant::now());
                }
            }
        }
    }

    /// Drop rooms that have been empty for at least the idle TTL
    ///
    /// Returns how many rooms were removed.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let ttl = self.idle_ttl;
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|id, room| {
            let idle = room.is_idle(now, ttl);
            if idle {
                info!("Evicting idle performance {}", id);
            }
            !idle
        });
        before - rooms.len()
    }

    /// Run `evict_idle` periodically until the registry is dropped elsewhere
    pub fn spawn_idle_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = weak.upgrade() else {
                    return;
                };
                let evicted = registry.evict_idle().await;
                if evicted > 0 {
                    debug!("Idle sweep removed {} performances", evicted);
                }
            }
        })
    }

    /// Apply an intent from `origin` to the canonical state and fan it out
    ///
    /// `join_performance` is handled by the socket layer and rejected here.
    pub async fn apply(&self, session_id: &str, origin: ConnectionId, message: ClientMessage) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("performance {}", session_id)))?;

        if !room.members.contains(&origin) {
            return Err(Error::Protocol("join_performance required first".to_string()));
        }

        let outbound = match message {
            ClientMessage::JoinPerformance => {
                return Err(Error::Protocol("join is not a control intent".to_string()));
            }
            ClientMessage::UpdatePerformanceControl { control, value } => {
                let update = ControlUpdate::from_wire(control, value)?;
                room.session.apply_control(&update);
                debug!("Performance {} control {:?}", session_id, update);
                ServerMessage::control_updated(update)
            }
            ClientMessage::PlaybackPlay => {
                if room.session.set_playing(true) {
                    room.progress_at = Instant::now();
                }
                ServerMessage::PlaybackPlay
            }
            ClientMessage::PlaybackPause => {
                room.session.set_playing(false);
                ServerMessage::PlaybackPause
            }
            ClientMessage::PlaybackSeek { time } => {
                let time = room.session.seek(time);
                room.progress_at = Instant::now();
                ServerMessage::PlaybackSeek { time }
            }
            ClientMessage::PlaybackSetSong { song_id } => {
                if room.session.set_song(&song_id) {
                    room.progress_at = Instant::now();
                }
                info!("Performance {} switched to song {}", session_id, song_id);
                ServerMessage::PlaybackSetSong { song_id }
            }
            ClientMessage::UpdatePlayerState {
                is_playing,
                current_time,
                duration,
            } => {
                if is_playing && current_time > room.progress_ceiling() {
                    debug!(
                        "Performance {} dropping heartbeat at {:.2}s from before a seek",
                        session_id, current_time
                    );
                    return Ok(());
                }
                let before = room.session.current_time;
                if !room.session.apply_heartbeat(is_playing, current_time, duration) {
                    debug!("Performance {} ignoring stale heartbeat", session_id);
                    return Ok(());
                }
                if room.session.current_time != before {
                    room.progress_at = Instant::now();
                }
                ServerMessage::PlayerStateUpdated {
                    is_playing: room.session.is_playing,
                    current_time: room.session.current_time,
                    duration: room.session.duration,
                }
            }
        };

        room.publish(origin, outbound);
        Ok(())
    }

    /// Current canonical state of a performance
    pub async fn snapshot(&self, session_id: &str) -> Option<PerformanceSession> {
        self.rooms
            .read()
            .await
            .get(session_id)
            .map(|room| room.session.clone())
    }

    /// All known performances, sorted by id
    pub async fn list(&self) -> Vec<PerformanceSummary> {
        let rooms = self.rooms.read().await;
        let mut summaries: Vec<PerformanceSummary> = rooms
            .iter()
            .map(|(id, room)| PerformanceSummary {
                session_id: id.clone(),
                members: room.members.len(),
                song_id: room.session.song_id.clone(),
                is_playing: room.session.is_playing,
            })
            .collect();
        summaries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        summaries
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}
