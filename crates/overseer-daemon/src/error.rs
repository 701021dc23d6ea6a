//! Daemon error types.

use std::path::PathBuf;

use overseer_attach::AttachError;
use overseer_config::ConfigError;
use overseer_events::DispatchError;
use overseer_process::ProcessError;
use overseer_telemetry::TelemetryError;

/// Errors that stop the daemon before or during startup.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured server jar does not exist.
    #[error("server jar not found at {}", .0.display())]
    JarNotFound(PathBuf),

    /// The attach socket could not be set up.
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// The supervisor could not be created.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A handler or route was rejected.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Logging could not be initialized.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
