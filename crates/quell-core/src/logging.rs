//! Structured logging for quell.
//!
//! `tracing` with configurable output format and destination. Initialize
//! once at startup; later calls are no-ops so tests and embedders cannot
//! trip over double initialization.
//!
//! Consistent correlation field names: `group_id` for per-group events,
//! `role` for storage backends, `desired`/`observed` for modes.

use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::{Error, Result};

/// Global flag to track if logging has been initialized.
static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-friendly output for interactive use.
    #[default]
    Pretty,
    /// JSON lines for machine consumption.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    /// Can be overridden by the RUST_LOG environment variable.
    pub level: String,

    /// Output format (pretty or json).
    pub format: LogFormat,

    /// Optional log file; when set, logs go there instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Initialize the global tracing subscriber. Idempotent.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    if LOGGING_INITIALIZED.set(true).is_err() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.file.is_none());

    match config.format {
        LogFormat::Pretty => builder
            .try_init()
            .map_err(|err| Error::Logging(err.to_string()))?,
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|err| Error::Logging(err.to_string()))?,
    }
    Ok(())
}
