//! Telemetry error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while setting up logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The level or a directive did not parse.
    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter {
        /// The offending filter text.
        directive: String,
        /// Parser message.
        message: String,
    },

    /// The log directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    LogDirectory {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber was already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
