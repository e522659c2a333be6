//! TOML-based configuration for camsync.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration. The data directory can be overridden from the environment
//! via [`AppConfig::apply_env_overrides`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// Environment variable that overrides `storage.data_dir`.
pub const DATA_DIR_ENV: &str = "CAMSYNC_DATA_DIR";

/// Upper bound accepted for `merge.commit_retries`.
pub const MAX_COMMIT_RETRIES: u32 = 20;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location and connection settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Merge orchestration settings.
    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the database file.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name, relative to `data_dir`.
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// How long a write waits on another process's lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/camsync")
}
fn default_database_file() -> String {
    "camsync.db".into()
}
fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Extra attempts after a commit loses a version race.
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,
}

fn default_commit_retries() -> u32 {
    3
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            commit_retries: default_commit_retries(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** apply environment overrides -- call
    /// [`apply_env_overrides`](Self::apply_env_overrides) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            debug!(env = DATA_DIR_ENV, data_dir = %dir, "overriding storage.data_dir");
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.database_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage.database_file".into(),
                detail: "database file name must not be empty".into(),
            });
        }
        if self.merge.commit_retries > MAX_COMMIT_RETRIES {
            return Err(ConfigError::InvalidValue {
                field: "merge.commit_retries".into(),
                detail: format!("must be at most {}", MAX_COMMIT_RETRIES),
            });
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: format!(
                    "unknown level '{}', expected one of {}",
                    self.logging.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        Ok(())
    }

    /// Convenience: load, apply environment overrides, and validate in one
    /// call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join(&self.storage.database_file)
    }
}
