//! # Application Errors
//!
//! `MonitorError` covers the monitoring actor; `CliError` wraps everything a
//! command can fail with.

use thiserror::Error;

/// Errors produced by the monitoring subsystem.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A required collaborator or setting is missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON conversion failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem watcher could not be created or attached.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Registry state provider failed.
    #[error("registry provider failed: {0}")]
    Provider(String),

    #[error("alert sink {sink} failed: {reason}")]
    Sink { sink: String, reason: String },

    #[error(transparent)]
    Core(#[from] polytier_core::Error),
}

/// Result alias for monitoring operations.
pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] polytier_core::Error),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad command-line input.
    #[error("{0}")]
    Invalid(String),
}

/// Result alias for CLI commands.
pub type CliResult<T> = std::result::Result<T, CliError>;
