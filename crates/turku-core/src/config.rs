//! Configuration resolution for Turku.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (explicit path, or ~/.config/turku/api.json)
//! 3. Environment variables
//! 4. CLI arguments (applied by the binary, highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete Turku API configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub health: HealthThresholds,
}

/// HTTP server and storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub database_path: Option<PathBuf>,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            database_path: None,
            log_json: false,
        }
    }
}

/// Staleness thresholds for entity health evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthThresholds {
    /// A freshly registered storage unit counts as healthy for this long.
    pub storage_registration_grace_secs: i64,
    /// A storage unit must have checked in within this window.
    pub storage_checkin_max_age_secs: i64,
    /// A freshly registered machine counts as healthy for this long.
    pub machine_registration_grace_secs: i64,
    /// A machine must have checked in within this window.
    pub machine_checkin_max_age_secs: i64,
    /// A freshly added source counts as healthy for this long.
    pub source_added_grace_secs: i64,
    /// How far past its due time a source may be before it is unhealthy.
    pub source_overdue_tolerance_secs: i64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            storage_registration_grace_secs: 30 * 60,
            storage_checkin_max_age_secs: 30 * 60,
            machine_registration_grace_secs: 60 * 60,
            machine_checkin_max_age_secs: 10 * 60 * 60,
            source_added_grace_secs: 4 * 60 * 60,
            source_overdue_tolerance_secs: 10 * 60 * 60,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist; the default global path is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => load_config_file(p)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs_config_home().map(|p| p.join("turku").join("api.json"))
}

/// Default registry database location.
pub fn default_database_path() -> Option<PathBuf> {
    std::env::var("XDG_DATA_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".local").join("share"))
        })
        .map(|p| p.join("turku").join("turku-api.db"))
}

fn dirs_config_home() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config, get: impl Fn(&str) -> Option<String>) {
    if let Some(val) = get("TURKU_LISTEN_ADDR") {
        config.server.listen_addr = val;
    }
    if let Some(val) = get("TURKU_DATABASE_PATH") {
        config.server.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = get("TURKU_LOG_JSON") {
        config.server.log_json = matches!(val.as_str(), "1" | "true" | "yes");
    }
}
