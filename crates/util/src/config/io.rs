//! Configuration IO helpers.

use crate::config::{AppConfig, validate_config};
use crate::expand_tilde;
use dirs_next::config_dir;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "VIITJEE_CONFIG_PATH";
/// Environment variable overriding `api.baseUrl`.
pub const API_BASE_ENV: &str = "VIITJEE_API_BASE";

/// Returns the default path for the configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("viitjee").join("config.json")
}

/// Loads and validates configuration from the default path.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let path = default_config_path();
    load_config_from_path(&path)
}

/// Loads and validates configuration from a specific path.
pub fn load_config_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let config = read_config_from_path(path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Reads configuration from the default path without validating it.
pub fn read_config() -> anyhow::Result<AppConfig> {
    let path = default_config_path();
    read_config_from_path(&path)
}

/// Reads configuration from a specific path and applies environment
/// overrides, leaving validation to the caller.
///
/// A missing file yields the defaults.
pub fn read_config_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)?
    } else {
        debug!(path = %path.display(), "config file not found; using defaults");
        AppConfig::default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply environment variable overrides on top of file values.
pub fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(base_url) = env::var(API_BASE_ENV)
        && !base_url.trim().is_empty()
    {
        config.api.base_url = base_url.trim().to_string();
    }
}
