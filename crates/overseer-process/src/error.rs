//! Process supervision errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while launching or talking to the server process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The child could not be spawned.
    #[error("failed to spawn '{program}' in {working_dir}: {source}")]
    Spawn {
        /// Program that was executed.
        program: String,
        /// Directory it was started in.
        working_dir: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The child was spawned without a piped stream.
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),

    /// The child did not report a process id.
    #[error("child process exited before reporting a pid")]
    NoPid,

    /// The done pattern did not compile.
    #[error("invalid done pattern: {0}")]
    Pattern(#[from] overseer_events::DispatchError),
}

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;
