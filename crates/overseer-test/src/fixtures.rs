//! Test fixtures for common values.

use std::path::PathBuf;
use std::time::Duration;

use overseer_process::{LaunchSpec, SupervisorConfig};

/// Done pattern used by the vanilla server.
pub const DONE_PATTERN: &str = r"^Done \([0-9.,]+s\)!.*";

/// Console line announcing a finished start.
pub const DONE_LINE: &str =
    "[12:00:00] [Server thread/INFO]: Done (3.512s)! For help, type \"help\"";

/// Format a vanilla console line.
#[must_use]
pub fn console_line(level: &str, message: &str) -> String {
    format!("[12:00:00] [Server thread/{level}]: {message}")
}

/// A chat line from `username`.
#[must_use]
pub fn chat_line(username: &str, message: &str) -> String {
    console_line("INFO", &format!("<{username}> {message}"))
}

/// A join line for `username`.
#[must_use]
pub fn join_line(username: &str) -> String {
    console_line("INFO", &format!("{username} joined the game"))
}

/// A quit line for `username`.
#[must_use]
pub fn quit_line(username: &str) -> String {
    console_line("INFO", &format!("{username} left the game"))
}

/// Supervisor settings pointing at a fake server.
#[must_use]
pub fn test_supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        launch: LaunchSpec {
            program: "java".into(),
            args: vec!["-jar".into(), "server.jar".into(), "nogui".into()],
            working_dir: PathBuf::from("."),
        },
        stop_command: "stop".into(),
        stop_timeout: Duration::from_secs(60),
        done_pattern: DONE_PATTERN.into(),
        stats_interval: Duration::from_secs(10),
    }
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A scratch directory removed on drop.
///
/// # Panics
///
/// Panics if the directory cannot be created.
#[must_use]
#[allow(clippy::expect_used)]
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("failed to create scratch directory")
}
