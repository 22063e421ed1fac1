//! Configuration for kms-relay
//!
//! Bootstrap-only settings; the relay keeps no runtime settings store.
//! Priority: command line > environment > TOML file > built-in defaults.

use serde::Deserialize;
use std::time::Duration;

/// Default relay port
pub const DEFAULT_PORT: u16 = 5780;

/// Relay configuration loaded from `kms-relay.toml`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind
    pub bind: String,

    /// HTTP/WebSocket port
    pub port: u16,

    /// Messages buffered per performance before slow members lag
    pub broadcast_capacity: usize,

    /// Seconds a performance with no members keeps its state
    pub idle_room_ttl_secs: u64,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            broadcast_capacity: 256,
            idle_room_ttl_secs: 600,
            logging: LoggingConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn idle_room_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_room_ttl_secs)
    }

    /// How often empty performances are checked against the TTL
    pub fn idle_sweep_period(&self) -> Duration {
        (self.idle_room_ttl() / 4).max(Duration::from_secs(1))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RelayConfig = toml::from_str("port = 6000\n[logging]\nlevel = \"debug\"\n").unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.idle_room_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn test_idle_sweep_period() {
        let config: RelayConfig = toml::from_str("idle_room_ttl_secs = 120\n").unwrap();
        assert_eq!(config.idle_sweep_period(), Duration::from_secs(30));

        let config: RelayConfig = toml::from_str("idle_room_ttl_secs = 0\n").unwrap();
        assert_eq!(config.idle_sweep_period(), Duration::from_secs(1));
    }
}
