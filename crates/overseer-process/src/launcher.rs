//! Spawning the server process.
//!
//! The supervisor talks to its child only through [`ChildHandle`], so tests
//! can substitute an in-memory process.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::{ProcessError, ProcessResult};

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub working_dir: PathBuf,
}

/// How the child exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitOutcome {
    /// Exit code, if it exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if it was signalled.
    pub signal: Option<i32>,
}

impl ExitOutcome {
    /// A normal exit with `code`.
    #[must_use]
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Termination by `signal`.
    #[must_use]
    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Waiting on and killing a running child.
#[async_trait]
pub trait ChildControl: Send {
    /// Wait for the child to exit. Must be cancel-safe.
    async fn wait(&mut self) -> std::io::Result<ExitOutcome>;

    /// Ask the OS to kill the child. Does not wait.
    fn start_kill(&mut self) -> std::io::Result<()>;
}

/// A spawned child's pipes and control.
pub struct ChildHandle {
    /// Process id.
    pub pid: u32,
    /// The child's stdin.
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// The child's stdout.
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// The child's stderr, if captured separately.
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Wait/kill.
    pub control: Box<dyn ChildControl>,
}

impl std::fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Starts server processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Spawn the child described by `spec`.
    async fn launch(&self, spec: &LaunchSpec) -> ProcessResult<ChildHandle>;
}

/// Launches real processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

struct TokioChild(Child);

#[async_trait]
impl ChildControl for TokioChild {
    async fn wait(&mut self) -> std::io::Result<ExitOutcome> {
        let status = self.0.wait().await?;
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Ok(ExitOutcome {
            code: status.code(),
            signal,
        })
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.0.start_kill()
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> ProcessResult<ChildHandle> {
        debug!(program = %spec.program, args = ?spec.args, cwd = %spec.working_dir.display(), "Spawning server");
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: spec.program.clone(),
                working_dir: spec.working_dir.clone(),
                source,
            })?;

        let pid = child.id().ok_or(ProcessError::NoPid)?;
        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take();
        info!(pid, program = %spec.program, "Server process spawned");

        Ok(ChildHandle {
            pid,
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>),
            control: Box::new(TokioChild(child)),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_spawn_echo_child() {
        let spec = LaunchSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "read line; echo \"got $line\"; exit 3".into()],
            working_dir: std::env::temp_dir(),
        };
        let mut child = CommandLauncher.launch(&spec).await.unwrap();
        assert!(child.pid > 0);

        child.stdin.write_all(b"ping\n").await.unwrap();
        child.stdin.flush().await.unwrap();

        let mut lines = BufReader::new(child.stdout).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("got ping"));
        assert_eq!(child.control.wait().await.unwrap(), ExitOutcome::code(3));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let spec = LaunchSpec {
            program: "/nonexistent/java".into(),
            args: vec![],
            working_dir: std::env::temp_dir(),
        };
        let err = CommandLauncher.launch(&spec).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn test_exit_outcome_display() {
        assert_eq!(ExitOutcome::code(1).to_string(), "exit code 1");
        assert_eq!(ExitOutcome::signal(9).to_string(), "signal 9");
        assert!(ExitOutcome::code(0).success());
        assert!(!ExitOutcome::signal(15).success());
    }
}
