//! Configuration for kms-player
//!
//! Bootstrap-only settings loaded from `kms-player.toml`. Shared controls
//! are never configured here; they always come from the performance.
//! Priority: command line > environment > TOML file > built-in defaults.

use serde::Deserialize;
use std::time::Duration;

use crate::channel::{performance_url, ReconnectPolicy};
use crate::device::Role;
use crate::error::{Error, Result};

/// Device configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Relay WebSocket base URL (`ws://host:port`)
    pub relay_url: String,

    /// Media server base URL serving `/songs/{id}/{track}`
    pub media_base_url: String,

    /// Performance to join
    pub session_id: String,

    pub role: Role,

    /// Heartbeat period while playing
    pub heartbeat_interval_ms: u64,

    /// Per-request fetch timeout for stems
    pub fetch_timeout_ms: u64,

    /// Output device name (system default if unset)
    pub audio_device: Option<String>,

    pub reconnect: ReconnectConfig,

    pub logging: LoggingConfig,
}

/// Relay reconnection backoff
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
}

impl DeviceConfig {
    /// Full WebSocket URL of the configured performance
    pub fn performance_url(&self) -> String {
        performance_url(&self.relay_url, &self.session_id)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Reject settings the device cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(Error::Config("session_id must not be empty".to_string()));
        }
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "relay_url must be a ws:// or wss:// URL, got '{}'",
                self.relay_url
            )));
        }
        if self.role.has_audio() && self.media_base_url.trim().is_empty() {
            return Err(Error::Config(
                "media_base_url is required for the stage role".to_string(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::Config("heartbeat_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:5780".to_string(),
            media_base_url: "http://127.0.0.1:8000".to_string(),
            session_id: "default".to_string(),
            role: Role::Stage,
            heartbeat_interval_ms: 300,
            fetch_timeout_ms: 30_000,
            audio_device: None,
            reconnect: ReconnectConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
