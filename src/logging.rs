//! Logging setup with optional file rotation
//!
//! Installs a `tracing` subscriber writing to stderr and/or a daily-rotated
//! file. `RUST_LOG` overrides the configured default level.

use crate::config::LoggingConfig;
use crate::error::{HistoryError, Result};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level
    pub level: Level,

    /// Log to file
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Emit JSON lines
    pub json: bool,

    /// Include thread IDs
    pub thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            stderr: true,
            json: false,
            thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Build from the `[logging]` section of the service configuration.
    /// `HISTORY_LOG_FILE` and `HISTORY_LOG_STDERR` still take precedence.
    pub fn from_settings(settings: &LoggingConfig) -> Self {
        Self {
            level: settings.level.parse().unwrap_or(Level::INFO),
            file_path: settings.file.clone(),
            stderr: settings.stderr,
            json: settings.json_format,
            thread_ids: false,
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(log_file) = std::env::var("HISTORY_LOG_FILE") {
            self.file_path = Some(PathBuf::from(log_file));
        }

        if let Ok(log_stderr) = std::env::var("HISTORY_LOG_STDERR") {
            self.stderr = log_stderr.to_lowercase() != "false";
        }

        self
    }

    /// Raise the level to DEBUG
    pub fn with_debug(mut self, debug: bool) -> Self {
        if debug {
            self.level = Level::DEBUG;
        }
        self
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging with the given configuration
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.stderr {
        layers.push(output_layer(std::io::stderr, true, &config));
    }

    if let Some(file_path) = &config.file_path {
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file_appender = tracing_appender::rolling::daily(
            file_path.parent().unwrap_or_else(|| Path::new(".")),
            file_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("building-history.log")),
        );
        layers.push(output_layer(file_appender, false, &config));
    }

    let subscriber = tracing_subscriber::registry().with(layers).with(env_filter);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| HistoryError::config(format!("failed to install logger: {e}")))?;

    Ok(())
}

fn output_layer<W>(writer: W, ansi: bool, config: &LogConfig) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(config.thread_ids);
    if config.json {
        layer.json().with_ansi(false).boxed()
    } else {
        layer.with_ansi(ansi).boxed()
    }
}

/// Performance logging helpers
pub struct PerfLogger;

impl PerfLogger {
    /// Log slow operations. A zero threshold disables the check.
    pub fn log_if_slow(operation: &str, duration_ms: u64, threshold_ms: u64) {
        if threshold_ms > 0 && duration_ms > threshold_ms {
            tracing::warn!(
                operation = operation,
                duration_ms = duration_ms,
                threshold_ms = threshold_ms,
                "Slow operation detected"
            );
        }
    }
}
