//! Configuration module for silo.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, SiloError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/silo.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// File storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory under which every stored file lives.
    #[serde(default = "default_root_path")]
    pub root_path: String,
    /// Public base URL used to build share links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Storage quota handed to new accounts, in megabytes.
    #[serde(default = "default_quota_mb")]
    pub default_quota_mb: u64,
}

fn default_root_path() -> String {
    "data/storage".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_quota_mb() -> u64 {
    1024
}

impl StorageConfig {
    /// Default quota in bytes.
    ///
    /// Values that do not fit an `i64` byte count are a config error.
    pub fn default_quota_bytes(&self) -> Result<i64> {
        self.default_quota_mb
            .checked_mul(1024 * 1024)
            .and_then(|bytes| i64::try_from(bytes).ok())
            .ok_or_else(|| {
                SiloError::Config(format!(
                    "storage.default_quota_mb is too large: {}",
                    self.default_quota_mb
                ))
            })
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            base_url: default_base_url(),
            default_quota_mb: default_quota_mb(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of operations running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    16
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/silo.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// File storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Worker pool configuration.
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(SiloError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| SiloError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `SILO_STORAGE_ROOT`: Override the storage root directory
    /// - `SILO_BASE_URL`: Override the share link base URL
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("SILO_STORAGE_ROOT") {
            if !root.is_empty() {
                self.storage.root_path = root;
            }
        }
        if let Ok(base_url) = std::env::var("SILO_BASE_URL") {
            if !base_url.is_empty() {
                self.storage.base_url = base_url;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - The storage root path is empty
    /// - The share link base URL is empty
    /// - The default quota does not fit in a byte count
    /// - The worker pool has no capacity
    pub fn validate(&self) -> Result<()> {
        if self.storage.root_path.trim().is_empty() {
            return Err(SiloError::Config(
                "storage.root_path can not be empty".to_string(),
            ));
        }
        if self.storage.base_url.trim().is_empty() {
            return Err(SiloError::Config(
                "storage.base_url must be a valid string".to_string(),
            ));
        }
        self.storage.default_quota_bytes()?;
        if self.workers.max_concurrent == 0 {
            return Err(SiloError::Config(
                "workers.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
