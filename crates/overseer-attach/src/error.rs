//! Attach error types.

use std::path::PathBuf;

use tokio_util::codec::LinesCodecError;

/// Errors from the attach socket.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// The socket could not be bound.
    #[error("failed to bind attach socket {path}: {source}")]
    Bind {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A live daemon already owns the socket.
    #[error("attach socket {0} is in use by a running instance")]
    InUse(PathBuf),

    /// No socket exists for the named instance.
    #[error("no running instance named '{name}' in {}", .dir.display())]
    UnknownInstance {
        /// Instance name.
        name: String,
        /// Directory searched.
        dir: PathBuf,
    },

    /// Could not connect to a socket.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A message could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Framing failed (oversized line or I/O).
    #[error(transparent)]
    Codec(#[from] LinesCodecError),

    /// JSON encoding or decoding failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The server is not listening.
    #[error("attach server is not running")]
    NotRunning,
}

/// Result type for attach operations.
pub type AttachResult<T> = Result<T, AttachError>;
