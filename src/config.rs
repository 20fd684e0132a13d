//! Configuration for the history service
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `HISTORY__` using `__` between
//! sections (for example `HISTORY__STORAGE__PATH=/var/lib/history.db`).

use crate::error::{HistoryError, Result};
use crate::history::WriteOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "HISTORY";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Where and how records are stored
    pub storage: StorageConfig,

    /// Retention applied on every write
    pub retention: RetentionConfig,

    /// Logging output
    pub logging: LoggingConfig,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database shared by all sources
    #[default]
    Sqlite,
    /// Volatile in-process storage
    Memory,
    /// Embedded redb key/value file
    Redb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend to use
    pub backend: StorageBackend,

    /// Database file
    pub path: PathBuf,

    /// Use a private in-memory SQLite database instead of `path`
    pub in_memory: bool,

    /// Pooled SQLite connections
    pub max_connections: u32,

    /// How long a writer waits for a locked database
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,

    /// Reads and writes slower than this are logged as warnings
    #[serde(with = "humantime_serde")]
    pub slow_query_threshold: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from("data/history.db"),
            in_memory: false,
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            slow_query_threshold: Duration::from_millis(250),
        }
    }
}

/// Retention policy applied to every store created from this configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Keep at most this many records per source
    pub max_count: Option<u64>,

    /// Drop records older than this at write time
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,

    /// Drop records created before this instant
    pub earliest_time: Option<DateTime<Utc>>,
}

impl RetentionConfig {
    /// Convert to write options. `max_age` takes precedence over
    /// `earliest_time`.
    pub fn write_options(&self) -> WriteOptions {
        let mut options = WriteOptions::new();
        if let Some(n) = self.max_count {
            options = options.with_max_count(n);
        }
        if let Some(t) = self.earliest_time {
            options = options.with_earliest_time(t);
        }
        if let Some(age) = self.max_age {
            options = options.with_max_age(age);
        }
        options
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,

    /// Also log to a daily-rotated file at this path
    pub file: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file: None,
            stderr: true,
        }
    }
}

impl HistoryConfig {
    /// Load defaults, then `path` if given, then `HISTORY__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.max_connections == 0 {
            return Err(HistoryError::config(
                "storage.max_connections must be greater than 0",
            ));
        }

        if self.storage.backend != StorageBackend::Memory
            && !self.storage.in_memory
            && self.storage.path.as_os_str().is_empty()
        {
            return Err(HistoryError::config("storage.path must not be empty"));
        }

        if self.retention.max_count == Some(0) {
            return Err(HistoryError::config(
                "retention.max_count must be greater than 0; omit it for no limit",
            ));
        }

        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(HistoryError::config(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }
}
