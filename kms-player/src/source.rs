//! Track sources
//!
//! The media server is an external collaborator reached only through
//! `fetch(song_id, track) -> bytes`. The HTTP implementation talks to
//! `{media_base_url}/songs/{song_id}/{vocal|instrumental}`.

use async_trait::async_trait;
use bytes::Bytes;
use kms_common::Track;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Default per-request fetch timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider of encoded stem bytes
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn fetch(&self, song_id: &str, track: Track) -> Result<Bytes>;
}

/// Media server client
pub struct HttpTrackSource {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpTrackSource {
    /// Client whose requests fail after `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("kms-player/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
        })
    }

    pub fn track_url(&self, song_id: &str, track: Track) -> String {
        format!(
            "{}/songs/{}/{}",
            self.base_url.trim_end_matches('/'),
            song_id,
            track.as_str()
        )
    }
}

#[async_trait]
impl TrackSource for HttpTrackSource {
    async fn fetch(&self, song_id: &str, track: Track) -> Result<Bytes> {
        let url = self.track_url(song_id, track);
        debug!(song_id = song_id, track = %track, "Fetching stem");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Connection(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Connection(format!("GET {}: HTTP {}", url, status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Connection(format!("GET {}: {}", url, e)))?;

        debug!(song_id = song_id, track = %track, bytes = bytes.len(), "Stem fetched");
        Ok(bytes)
    }
}

/// In-memory source with optional per-song latency
#[derive(Default)]
pub struct MemoryTrackSource {
    tracks: Mutex<HashMap<(String, Track), Bytes>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl MemoryTrackSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, song_id: &str, track: Track, bytes: impl Into<Bytes>) {
        self.tracks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((song_id.to_string(), track), bytes.into());
    }

    /// Delay every fetch of `song_id`
    pub fn set_delay(&self, song_id: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(song_id.to_string(), delay);
    }
}

#[async_trait]
impl TrackSource for MemoryTrackSource {
    async fn fetch(&self, song_id: &str, track: Track) -> Result<Bytes> {
        let delay = self
            .delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(song_id)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.tracks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(song_id.to_string(), track))
            .cloned()
            .ok_or_else(|| Error::Connection(format!("no {} track for song {}", track, song_id)))
    }
}
