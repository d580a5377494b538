//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$DISKMAIL_CONFIG` (environment variable)
//! 2. `~/.config/diskmail/config.toml` (Linux/macOS)
//!    `%APPDATA%\diskmail\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::index::IndexOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// On-disk layout and durability.
    pub storage: StorageConfig,
    /// Bounds on listing and search.
    pub listing: ListingConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override directory for the log file.
    pub log_dir: Option<PathBuf>,
}

/// On-disk layout and durability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Index database file name inside each mailbox directory.
    pub index_file: String,
    /// Extension of body files (without the dot).
    pub body_extension: String,
    /// fsync each body file before it is renamed into place.
    pub sync_bodies: bool,
    /// How long an index statement waits on a lock, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Idle read connections kept per mailbox.
    pub max_idle_readers: usize,
}

/// Bounds on listing and search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Longest a listing or search may hold its read transaction, in
    /// milliseconds (0 = no limit).
    pub max_duration_ms: u64,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_dir: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_file: "index.db".to_string(),
            body_extension: "eml".to_string(),
            sync_bodies: true,
            busy_timeout_ms: 5_000,
            max_idle_readers: 4,
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: 30_000,
        }
    }
}

impl StorageConfig {
    /// Options for opening a mailbox index with these settings.
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            file_name: self.index_file.clone(),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            max_idle_readers: self.max_idle_readers,
        }
    }
}

impl ListingConfig {
    /// Default deadline for listings and searches, if any.
    pub fn max_duration(&self) -> Option<Duration> {
        (self.max_duration_ms > 0).then(|| Duration::from_millis(self.max_duration_ms))
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    match config_file_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Config::default(),
    }
}

/// Load configuration from `path`, falling back to defaults on any error.
pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded config");
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("DISKMAIL_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    // 2. Standard config directory
    dirs::config_dir().map(|d| d.join("diskmail").join("config.toml"))
}

/// Return the log file path, if a log directory is configured or derivable.
pub fn log_file_path(config: &Config) -> Option<PathBuf> {
    config
        .general
        .log_dir
        .clone()
        .or_else(|| dirs::cache_dir().map(|d| d.join("diskmail")))
        .map(|dir| dir.join("diskmail.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.storage.index_file, "index.db");
        assert_eq!(cfg.storage.body_extension, "eml");
        assert!(cfg.storage.sync_bodies);
        assert_eq!(cfg.listing.max_duration(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let mut cfg = Config::default();
        cfg.storage.busy_timeout_ms = 250;
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.storage.busy_timeout_ms, 250);
        assert_eq!(parsed.storage.index_options().busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[storage]
sync_bodies = false

[listing]
max_duration_ms = 0
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert!(!cfg.storage.sync_bodies);
        assert_eq!(cfg.listing.max_duration(), None);
        // Other fields use defaults
        assert_eq!(cfg.storage.max_idle_readers, 4);
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_load_config_from_bad_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        let cfg = load_config_from(&path);
        assert_eq!(cfg.storage.index_file, "index.db");

        let missing = load_config_from(&dir.path().join("absent.toml"));
        assert_eq!(missing.general.log_level, "warn");
    }

    #[test]
    fn test_log_file_path_prefers_configured_dir() {
        let mut cfg = Config::default();
        cfg.general.log_dir = Some(PathBuf::from("/var/log/mail"));
        assert_eq!(
            log_file_path(&cfg),
            Some(PathBuf::from("/var/log/mail/diskmail.log"))
        );
    }
}
