//! Configuration file resolution
//!
//! Every KMS binary resolves its settings in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (handled by clap `env = ...`)
//! 3. TOML config file
//! 4. Built-in default (fallback)
//!
//! This module covers tiers 3 and 4: locating the TOML file for a module and
//! deserializing it over the module's defaults.

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{Error, Result};

/// Environment variable that overrides the config directory
pub const CONFIG_DIR_ENV: &str = "KMS_CONFIG_DIR";

/// Candidate config file locations for a module, most specific first
///
/// - `$KMS_CONFIG_DIR/<module>.toml`
/// - `~/.config/kms/<module>.toml` (platform config dir)
/// - `/etc/kms/<module>.toml` (unix only)
pub fn candidate_paths(module_name: &str) -> Vec<PathBuf> {
    let file_name = format!("{}.toml", module_name);
    let mut paths = Vec::new();

    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        paths.push(PathBuf::from(dir).join(&file_name));
    }
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("kms").join(&file_name));
    }
    if cfg!(unix) {
        paths.push(PathBuf::from("/etc/kms").join(&file_name));
    }
    paths
}

/// Find the first existing config file for a module
pub fn find_config_file(module_name: &str) -> Option<PathBuf> {
    candidate_paths(module_name).into_iter().find(|p| p.exists())
}

/// Load a module's TOML config
///
/// An explicit path must exist. Without one, the standard locations are
/// searched; if none exists the built-in defaults are returned.
pub fn load_toml_config<T>(explicit: Option<&Path>, module_name: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match find_config_file(module_name) {
            Some(path) => path,
            None => {
                debug!("No config file for {}, using built-in defaults", module_name);
                return Ok(T::default());
            }
        },
    };

    info!("Loading configuration from {}", path.display());
    parse_toml_file(&path)
}

/// Parse a TOML file into a config struct
pub fn parse_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
}
