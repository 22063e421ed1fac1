//! Tests for config file resolution and graceful degradation
//!
//! Tests:
//! - Missing config files fall back to built-in defaults
//! - KMS_CONFIG_DIR takes precedence over platform locations
//! - Explicit paths must exist
//! - Invalid TOML is reported as a configuration error
//!
//! Note: Uses serial_test to prevent environment variable races.
//! Tests that manipulate KMS_CONFIG_DIR are marked with #[serial].

use kms_common::config::{candidate_paths, load_toml_config, CONFIG_DIR_ENV};
use kms_common::Error;
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::fs;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
struct SampleConfig {
    port: u16,
    label: String,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            port: 1234,
            label: "default".to_string(),
        }
    }
}

#[test]
#[serial]
fn test_config_dir_env_is_searched_first() {
    let dir = tempfile::tempdir().unwrap();
    env::set_var(CONFIG_DIR_ENV, dir.path());

    let paths = candidate_paths("kms-test");
    assert_eq!(paths[0], dir.path().join("kms-test.toml"));

    env::remove_var(CONFIG_DIR_ENV);
}

#[test]
#[serial]
fn test_missing_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    env::set_var(CONFIG_DIR_ENV, dir.path());

    // A module name nobody has a config for
    let config: SampleConfig = load_toml_config(None, "kms-test-nonexistent-module").unwrap();
    assert_eq!(config, SampleConfig::default());

    env::remove_var(CONFIG_DIR_ENV);
}

#[test]
#[serial]
fn test_config_from_env_dir_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("kms-test-env.toml"), "port = 9000\n").unwrap();
    env::set_var(CONFIG_DIR_ENV, dir.path());

    let config: SampleConfig = load_toml_config(None, "kms-test-env").unwrap();
    assert_eq!(config.port, 9000);
    // Unspecified keys keep their defaults
    assert_eq!(config.label, "default");

    env::remove_var(CONFIG_DIR_ENV);
}

#[test]
fn test_explicit_path_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let result: kms_common::Result<SampleConfig> = load_toml_config(Some(&missing), "kms-test");
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "port = \"not a number\"\n").unwrap();

    let result: kms_common::Result<SampleConfig> = load_toml_config(Some(&path), "kms-test");
    match result {
        Err(Error::Config(msg)) => assert!(msg.contains("broken.toml")),
        other => panic!("expected config error, got {:?}", other),
    }
}
