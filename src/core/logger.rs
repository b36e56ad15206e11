//! Diagnostic logging setup
//!
//! Installs the global `tracing` subscriber used by the daemon: a console
//! layer plus, when a directory is configured, a daily rolling log file.

use crate::config::LoggingConfig;
use std::path::Path;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Prefix of the rolling log files
pub const LOG_FILE_PREFIX: &str = "netremote";

/// Logging setup errors
#[derive(Error, Debug)]
pub enum LoggerError {
    /// Filter directive does not parse
    #[error("Invalid log filter '{0}'")]
    Filter(String),

    /// Log directory could not be created
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rolling file could not be opened
    #[error("Log file error: {0}")]
    Appender(#[from] InitError),

    /// A global subscriber is already installed
    #[error("Logger already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Keeps the file writer flushing; drop it last
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Filter from an explicit level, else `RUST_LOG`, else the configured level
pub fn build_filter(explicit: Option<&str>, configured: &str) -> Result<EnvFilter, LoggerError> {
    if let Some(level) = explicit {
        return EnvFilter::try_new(level).map_err(|_| LoggerError::Filter(level.to_string()));
    }
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(configured)
            .map_err(|_| LoggerError::Filter(configured.to_string())),
    }
}

fn file_layer(directory: &Path, json: bool) -> Result<(BoxedLayer, WorkerGuard), LoggerError> {
    std::fs::create_dir_all(directory)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(directory)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer().with_ansi(false).with_writer(writer);
    let layer = if json { layer.json().boxed() } else { layer.boxed() };
    Ok((layer, guard))
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig, explicit_level: Option<&str>) -> Result<LogGuard, LoggerError> {
    let filter = build_filter(explicit_level, &config.level)?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(if config.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    });

    let mut guard = None;
    if let Some(directory) = &config.directory {
        let (layer, file_guard) = file_layer(directory, config.json)?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))?;

    Ok(LogGuard { _file: guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_wins() {
        assert!(build_filter(Some("debug"), "not a level!").is_ok());
    }

    #[test]
    fn test_invalid_level() {
        assert!(matches!(
            build_filter(Some("netremote=loud"), "info"),
            Err(LoggerError::Filter(_))
        ));
    }

    #[test]
    fn test_file_layer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let (_layer, _guard) = file_layer(&logs, false).unwrap();
        assert!(logs.is_dir());
    }
}
