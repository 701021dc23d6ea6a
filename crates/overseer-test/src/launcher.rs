//! An in-memory stand-in for the server process.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use overseer_process::{
    ChildControl, ChildHandle, ExitOutcome, LaunchSpec, Launcher, ProcessError, ProcessResult,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{mpsc, watch};

const PIPE_CAPACITY: usize = 64 * 1024;
const FIRST_PID: u32 = 4000;

/// Signal number reported for a killed fake process.
pub const KILL_SIGNAL: i32 = 9;

#[derive(Debug, Clone, Default)]
struct Behaviour {
    boot_lines: Vec<String>,
    exit_on: Option<(String, i32)>,
    ignore_kill: bool,
    failures: u32,
    launch_delay: Duration,
}

struct ProcessCore {
    pid: u32,
    exit: watch::Sender<Option<ExitOutcome>>,
    stdout: Mutex<Option<DuplexStream>>,
    stderr: Mutex<Option<DuplexStream>>,
    inputs: Mutex<Vec<String>>,
    kills: AtomicU32,
    ignore_kill: bool,
}

impl ProcessCore {
    fn finish(&self, outcome: ExitOutcome) {
        for pipe in [&self.stdout, &self.stderr] {
            pipe.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
        self.exit.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(outcome);
            true
        });
    }
}

struct FakeControl {
    core: Arc<ProcessCore>,
    exit: watch::Receiver<Option<ExitOutcome>>,
}

#[async_trait]
impl ChildControl for FakeControl {
    async fn wait(&mut self) -> std::io::Result<ExitOutcome> {
        let outcome = *self
            .exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| std::io::Error::other("fake process vanished"))?;
        Ok(outcome.unwrap_or_default())
    }

    fn start_kill(&mut self) -> std::io::Result<()> {
        self.core.kills.fetch_add(1, Ordering::SeqCst);
        if !self.core.ignore_kill {
            self.core.finish(ExitOutcome::signal(KILL_SIGNAL));
        }
        Ok(())
    }
}

/// Test-side controller of one fake process.
pub struct FakeServer {
    core: Arc<ProcessCore>,
    inputs: mpsc::UnboundedReceiver<String>,
}

impl std::fmt::Debug for FakeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeServer")
            .field("pid", &self.core.pid)
            .finish_non_exhaustive()
    }
}

impl FakeServer {
    /// The fake pid.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.core.pid
    }

    /// Write one line to the process's stdout. Ignored after exit.
    pub async fn emit(&self, line: &str) {
        self.write_line(&self.core.stdout, line).await;
    }

    /// Write one line to the process's stderr. Ignored after exit.
    pub async fn emit_stderr(&self, line: &str) {
        self.write_line(&self.core.stderr, line).await;
    }

    async fn write_line(&self, pipe: &Mutex<Option<DuplexStream>>, line: &str) {
        let writer = pipe.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut writer) = writer else {
            return;
        };
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        if writer.write_all(&bytes).await.is_err() {
            return;
        }
        if self.is_exited() {
            return;
        }
        *pipe.lock().unwrap_or_else(PoisonError::into_inner) = Some(writer);
    }

    /// Next line the supervisor wrote to stdin.
    pub async fn next_input(&mut self) -> Option<String> {
        self.inputs.recv().await
    }

    /// Next stdin line, or `None` if nothing arrives within `timeout`.
    pub async fn next_input_within(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.inputs.recv())
            .await
            .ok()
            .flatten()
    }

    /// Every stdin line received so far.
    #[must_use]
    pub fn inputs(&self) -> Vec<String> {
        self.core
            .inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make the process exit with `code`.
    pub fn exit(&self, code: i32) {
        self.core.finish(ExitOutcome::code(code));
    }

    /// Kill requests received.
    #[must_use]
    pub fn kills(&self) -> u32 {
        self.core.kills.load(Ordering::SeqCst)
    }

    /// Whether the process has exited.
    #[must_use]
    pub fn is_exited(&self) -> bool {
        self.core.exit.borrow().is_some()
    }
}

struct LauncherInner {
    behaviour: Behaviour,
    next_pid: AtomicU32,
    failures_left: AtomicU32,
    specs: Mutex<Vec<LaunchSpec>>,
    servers_tx: mpsc::UnboundedSender<FakeServer>,
    servers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeServer>>,
}

/// A [`Launcher`] producing scriptable in-memory processes.
///
/// Every launch hands a [`FakeServer`] controller to the test through
/// [`next_server`](Self::next_server).
#[derive(Clone)]
pub struct FakeLauncher {
    inner: Arc<LauncherInner>,
}

impl std::fmt::Debug for FakeLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeLauncher")
            .field("launches", &self.launches())
            .finish_non_exhaustive()
    }
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLauncher {
    /// A launcher whose processes print nothing and never exit on their own.
    #[must_use]
    pub fn new() -> Self {
        Self::with_behaviour(Behaviour::default())
    }

    fn with_behaviour(behaviour: Behaviour) -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(LauncherInner {
                failures_left: AtomicU32::new(behaviour.failures),
                behaviour,
                next_pid: AtomicU32::new(FIRST_PID),
                specs: Mutex::new(Vec::new()),
                servers_tx,
                servers_rx: tokio::sync::Mutex::new(servers_rx),
            }),
        }
    }

    fn map(self, f: impl FnOnce(&mut Behaviour)) -> Self {
        let mut behaviour = self.inner.behaviour.clone();
        f(&mut behaviour);
        Self::with_behaviour(behaviour)
    }

    /// Print `lines` as soon as each process starts.
    #[must_use]
    pub fn with_boot_lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        self.map(|b| b.boot_lines = lines)
    }

    /// Exit with `code` when `command` arrives on stdin.
    #[must_use]
    pub fn exit_on(self, command: impl Into<String>, code: i32) -> Self {
        let command = command.into();
        self.map(|b| b.exit_on = Some((command, code)))
    }

    /// Count kill requests but keep running.
    #[must_use]
    pub fn ignoring_kill(self) -> Self {
        self.map(|b| b.ignore_kill = true)
    }

    /// Take `delay` to spawn each process, like a slow `fork`/`exec`.
    #[must_use]
    pub fn with_launch_delay(self, delay: Duration) -> Self {
        self.map(|b| b.launch_delay = delay)
    }

    /// Fail the first `count` launches.
    #[must_use]
    pub fn failing(self, count: u32) -> Self {
        self.map(|b| b.failures = count)
    }

    /// Number of successful launches.
    #[must_use]
    pub fn launches(&self) -> u32 {
        self.inner
            .next_pid
            .load(Ordering::SeqCst)
            .saturating_sub(FIRST_PID)
    }

    /// Specs passed to every launch attempt.
    #[must_use]
    pub fn specs(&self) -> Vec<LaunchSpec> {
        self.inner
            .specs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Controller for the next launched process.
    pub async fn next_server(&self) -> Option<FakeServer> {
        self.inner.servers_rx.lock().await.recv().await
    }

    /// Like [`next_server`](Self::next_server) but gives up after `timeout`.
    pub async fn next_server_within(&self, timeout: Duration) -> Option<FakeServer> {
        tokio::time::timeout(timeout, self.next_server())
            .await
            .ok()
            .flatten()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> ProcessResult<ChildHandle> {
        self.inner
            .specs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());

        let delay = self.inner.behaviour.launch_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .inner
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ProcessError::Spawn {
                program: spec.program.clone(),
                working_dir: spec.working_dir.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "fake launch failure"),
            });
        }

        let pid = self.inner.next_pid.fetch_add(1, Ordering::SeqCst);
        let behaviour = &self.inner.behaviour;

        let (stdin, child_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (mut child_stdout, stdout) = tokio::io::duplex(PIPE_CAPACITY);
        for line in &behaviour.boot_lines {
            let mut bytes = line.as_bytes().to_vec();
            bytes.push(b'\n');
            child_stdout.write_all(&bytes).await.map_err(|source| ProcessError::Spawn {
                program: spec.program.clone(),
                working_dir: spec.working_dir.clone(),
                source,
            })?;
        }

        let (child_stderr, stderr) = tokio::io::duplex(PIPE_CAPACITY);

        let (exit, exit_rx) = watch::channel(None);
        let core = Arc::new(ProcessCore {
            pid,
            exit,
            stdout: Mutex::new(Some(child_stdout)),
            stderr: Mutex::new(Some(child_stderr)),
            inputs: Mutex::new(Vec::new()),
            kills: AtomicU32::new(0),
            ignore_kill: behaviour.ignore_kill,
        });

        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_stdin(
            Arc::clone(&core),
            child_stdin,
            inputs_tx,
            behaviour.exit_on.clone(),
        ));

        let _ = self.inner.servers_tx.send(FakeServer {
            core: Arc::clone(&core),
            inputs: inputs_rx,
        });

        Ok(ChildHandle {
            pid,
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Some(Box::new(stderr)),
            control: Box::new(FakeControl {
                core,
                exit: exit_rx,
            }),
        })
    }
}

async fn read_stdin(
    core: Arc<ProcessCore>,
    stdin: DuplexStream,
    inputs: mpsc::UnboundedSender<String>,
    exit_on: Option<(String, i32)>,
) {
    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        core.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.clone());
        let exits = exit_on
            .as_ref()
            .and_then(|(command, code)| (*command == line).then_some(*code));
        let _ = inputs.send(line);
        if let Some(code) = exits {
            core.finish(ExitOutcome::code(code));
        }
    }
}
