//! Device configuration loading
//!
//! Note: Uses serial_test because KMS_CONFIG_DIR is process-wide.

use kms_common::config::{load_toml_config, CONFIG_DIR_ENV};
use kms_player::config::DeviceConfig;
use kms_player::Role;
use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;

#[test]
#[serial]
fn test_player_config_found_in_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("kms-player.toml"),
        r#"
relay_url = "ws://relay.lan:5780"
media_base_url = "http://media.lan:8000"
session_id = "friday"
role = "controller"
heartbeat_interval_ms = 250

[reconnect]
max_attempts = 3
initial_delay_ms = 100

[logging]
level = "debug"
"#,
    )
    .unwrap();
    env::set_var(CONFIG_DIR_ENV, dir.path());

    let config: DeviceConfig = load_toml_config(None, "kms-player").unwrap();
    config.validate().unwrap();
    assert_eq!(config.role, Role::Controller);
    assert_eq!(config.performance_url(), "ws://relay.lan:5780/performances/friday/ws");
    assert_eq!(config.heartbeat_interval(), Duration::from_millis(250));

    let policy = config.reconnect.policy();
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    assert_eq!(policy.max_delay, Duration::from_secs(8));
    assert_eq!(config.logging.level, "debug");

    env::remove_var(CONFIG_DIR_ENV);
}

#[test]
#[serial]
fn test_unknown_role_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("player.toml");
    fs::write(&path, "role = \"dj\"\n").unwrap();

    let result: kms_common::Result<DeviceConfig> = load_toml_config(Some(&path), "kms-player");
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_stage_requires_media_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("player.toml");
    fs::write(&path, "role = \"stage\"\nmedia_base_url = \"\"\n").unwrap();

    let config: DeviceConfig = load_toml_config(Some(&path), "kms-player").unwrap();
    assert!(config.validate().is_err());

    // Passive roles never fetch media
    let viewer = DeviceConfig {
        role: Role::Viewer,
        ..config
    };
    viewer.validate().unwrap();
}
