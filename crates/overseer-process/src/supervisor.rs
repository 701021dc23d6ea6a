//! The server lifecycle state machine.
//!
//! ```text
//! idle ──start──▶ starting ──done line──▶ running
//!                    │                       │
//!                    └───────stop────────────┤
//!                                            ▼
//!                               stopping ──failsafe──▶ killing
//!                                   │                     │
//!                                   └──────exit───────────┴──▶ stopped
//! ```
//!
//! Every transition is driven by an event on the dispatcher. The supervisor
//! registers its own handlers in [`Supervisor::install`] and talks to the
//! child only through a [`ChildHandle`].

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use overseer_events::{
    Console, DispatchResult, Dispatcher, EventPayload, FatalError, HandlerResult, Outcome,
    Prefilter, Priority, RegistrationId, ServerEvent, ServerInput, ServerOutput, ServerStart,
    ServerStarted, ServerStarting, ServerStop, ServerStopped, ServerStopping, StatProcess,
    TaskHandle, compile_regex, schedule_repeating,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::console::decode_output;
use crate::decoder::LineDecoder;
use crate::error::ProcessResult;
use crate::guard::TimeoutGuard;
use crate::launcher::{ChildControl, ChildHandle, ExitOutcome, LaunchSpec, Launcher};
use crate::sampler::ProcessSampler;

/// How long to wait for output readers to drain after the child exits.
const READER_DRAIN: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 4096;

/// Supervisor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    /// Nothing launched yet.
    Idle,
    /// Spawned, waiting for the done line.
    Starting,
    /// Up and accepting players.
    Running,
    /// Stop command sent, waiting for exit.
    Stopping,
    /// Kill issued, waiting for exit.
    Killing,
    /// The child has exited.
    Stopped,
}

impl SupervisorState {
    /// Lower-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Killing => "killing",
            Self::Stopped => "stopped",
        }
    }

    /// Whether a child process is alive in this state.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Running | Self::Stopping | Self::Killing
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// What to spawn.
    pub launch: LaunchSpec,
    /// Line written to stdin to ask the server to stop.
    pub stop_command: String,
    /// Grace period before a stop escalates to a kill.
    pub stop_timeout: Duration,
    /// Message body regex that marks the server as started.
    pub done_pattern: String,
    /// Interval between resource samples.
    pub stats_interval: Duration,
}

struct Shared {
    phase: SupervisorState,
    generation: u64,
    pid: Option<u32>,
    stdin: Option<mpsc::UnboundedSender<String>>,
    kill: Option<mpsc::UnboundedSender<()>>,
    respawn: bool,
    failsafe: Option<TimeoutGuard>,
    stats: Option<TaskHandle>,
    kills_issued: u32,
}

struct Attached {
    generation: u64,
    stdout: Box<dyn AsyncRead + Send + Unpin>,
    stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    control: Box<dyn ChildControl>,
    kill_rx: mpsc::UnboundedReceiver<()>,
}

struct Inner {
    config: SupervisorConfig,
    dispatcher: Dispatcher,
    launcher: Arc<dyn Launcher>,
    sampler: Arc<dyn ProcessSampler>,
    shared: Mutex<Shared>,
    terminated: watch::Sender<bool>,
    registrations: Mutex<Vec<RegistrationId>>,
}

/// Owns the server process. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor. Call [`install`](Self::install) to hook it up.
    ///
    /// # Errors
    ///
    /// Returns an error if the done pattern does not compile.
    pub fn new(
        config: SupervisorConfig,
        dispatcher: Dispatcher,
        launcher: Arc<dyn Launcher>,
        sampler: Arc<dyn ProcessSampler>,
    ) -> ProcessResult<Self> {
        compile_regex(&config.done_pattern)?;
        let (terminated, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                dispatcher,
                launcher,
                sampler,
                shared: Mutex::new(Shared {
                    phase: SupervisorState::Idle,
                    generation: 0,
                    pid: None,
                    stdin: None,
                    kill: None,
                    respawn: false,
                    failsafe: None,
                    stats: None,
                    kills_issued: 0,
                }),
                terminated,
                registrations: Mutex::new(Vec::new()),
            }),
        })
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.shared().phase
    }

    /// Pid of the live child.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.shared().pid
    }

    /// Number of kills sent to children so far.
    #[must_use]
    pub fn kills_issued(&self) -> u32 {
        self.shared().kills_issued
    }

    /// Whether a stop finished without a respawn following it.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        *self.inner.terminated.borrow()
    }

    /// Resolve once the server has stopped for good.
    pub async fn wait_terminated(&self) {
        let mut rx = self.inner.terminated.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Register the supervisor's handlers.
    ///
    /// # Errors
    ///
    /// Returns an error if a registration is rejected.
    pub fn install(&self) -> DispatchResult<()> {
        let done = Prefilter::pattern(self.inner.config.done_pattern.clone());
        let ids = vec![
            self.handle::<ServerStart, _, _>(Priority::NORMAL, Prefilter::new(), |sup, _| {
                sup.on_start()
            })?,
            self.handle::<ServerOutput, _, _>(Priority::NORMAL, done, |sup, _| sup.on_done())?,
            self.handle::<ServerStop, _, _>(Priority::NORMAL, Prefilter::new(), |sup, stop| {
                sup.on_stop(stop)
            })?,
            self.handle::<ServerInput, _, _>(Priority::NORMAL, Prefilter::new(), |sup, input| {
                sup.on_input(input)
            })?,
            self.handle::<ServerStarting, _, _>(Priority::NORMAL, Prefilter::new(), |sup, _| {
                sup.on_starting()
            })?,
            self.handle::<ServerStopped, _, _>(Priority::NORMAL, Prefilter::new(), |sup, _| {
                sup.on_stopped()
            })?,
        ];
        self.inner
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids);
        Ok(())
    }

    /// Remove the supervisor's handlers.
    pub fn uninstall(&self) {
        let ids = std::mem::take(
            &mut *self
                .inner
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for id in ids {
            self.inner.dispatcher.unregister(id);
        }
    }

    fn handle<T, F, Fut>(
        &self,
        priority: Priority,
        prefilter: Prefilter,
        f: F,
    ) -> DispatchResult<RegistrationId>
    where
        T: EventPayload,
        F: Fn(Supervisor, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner
            .dispatcher
            .on::<T, _, _>(priority, prefilter, move |payload| {
                let pending = weak
                    .upgrade()
                    .map(|inner| f(Supervisor { inner }, payload));
                async move {
                    if let Some(pending) = pending {
                        pending.await?;
                    }
                    HandlerResult::Ok(Outcome::NONE)
                }
            })
    }

    async fn dispatch(&self, event: impl Into<overseer_events::Event>) -> bool {
        self.inner.dispatcher.dispatch(event).await
    }

    fn mark_terminated_if_down(&self) {
        if !self.state().is_live() {
            info!("Server stopped for good");
            self.inner.terminated.send_replace(true);
        }
    }

    async fn on_start(self) -> anyhow::Result<()> {
        {
            let mut shared = self.shared();
            match shared.phase {
                SupervisorState::Idle | SupervisorState::Stopped => {
                    shared.phase = SupervisorState::Starting;
                    shared.respawn = false;
                },
                other => {
                    warn!(state = %other, "Ignoring start request, server already up");
                    return Ok(());
                },
            }
        }
        self.inner.terminated.send_replace(false);

        let child = match self.inner.launcher.launch(&self.inner.config.launch).await {
            Ok(child) => child,
            Err(err) => {
                error!(error = %err, "Failed to start server");
                self.shared().phase = SupervisorState::Stopped;
                self.dispatch(ServerEvent::new("server/error", err.to_string(), 2))
                    .await;
                self.dispatch(FatalError {
                    reason: format!("failed to start server: {err}"),
                })
                .await;
                self.mark_terminated_if_down();
                return Ok(());
            },
        };

        let pid = child.pid;
        let attached = self.attach_child(child);
        self.dispatch(ServerStarting { pid }).await;
        self.watch_child(attached);
        Ok(())
    }

    /// Publish the child's pid and pipes. Output is not read until
    /// [`watch_child`](Self::watch_child), so `ServerStarting` always
    /// precedes the first output line.
    fn attach_child(&self, child: ChildHandle) -> Attached {
        let ChildHandle {
            pid,
            stdin,
            stdout,
            stderr,
            control,
        } = child;

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();

        let generation = {
            let mut shared = self.shared();
            // A stop that arrived while the launch was pending found no pipes.
            match shared.phase {
                SupervisorState::Killing => {
                    if kill_tx.send(()).is_ok() {
                        shared.kills_issued = shared.kills_issued.saturating_add(1);
                        warn!(pid, "Killing server process stopped during launch");
                    }
                },
                SupervisorState::Stopping => {
                    if stdin_tx.send(self.inner.config.stop_command.clone()).is_ok() {
                        debug!(pid, "Sending stop command deferred during launch");
                    }
                },
                _ => {},
            }
            shared.generation = shared.generation.wrapping_add(1);
            shared.pid = Some(pid);
            shared.stdin = Some(stdin_tx);
            shared.kill = Some(kill_tx);
            shared.generation
        };

        tokio::spawn(write_stdin(stdin, stdin_rx));

        Attached {
            generation,
            stdout,
            stderr,
            control,
            kill_rx,
        }
    }

    fn watch_child(&self, attached: Attached) {
        let Attached {
            generation,
            stdout,
            stderr,
            control,
            kill_rx,
        } = attached;

        let mut readers = vec![tokio::spawn(pump_output(
            self.inner.dispatcher.clone(),
            stdout,
            "stdout",
        ))];
        if let Some(stderr) = stderr {
            readers.push(tokio::spawn(pump_output(
                self.inner.dispatcher.clone(),
                stderr,
                "stderr",
            )));
        }

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = wait_for_exit(control, kill_rx).await;
            for reader in readers {
                if tokio::time::timeout(READER_DRAIN, reader).await.is_err() {
                    debug!("Output reader still open after exit");
                }
            }
            this.on_exit(generation, outcome).await;
        });
    }

    async fn on_done(self) -> anyhow::Result<()> {
        {
            let mut shared = self.shared();
            if shared.phase != SupervisorState::Starting {
                return Ok(());
            }
            shared.phase = SupervisorState::Running;
        }
        info!("Server started");
        self.dispatch(ServerStarted {}).await;
        Ok(())
    }

    async fn on_stop(self, stop: ServerStop) -> anyhow::Result<()> {
        let (kill, respawn) = {
            let mut shared = self.shared();
            match (shared.phase, stop.kill) {
                (SupervisorState::Idle | SupervisorState::Stopped, _) => {
                    debug!(reason = %stop.reason, "Stop requested while server is down");
                    return Ok(());
                },
                (SupervisorState::Killing, _) | (SupervisorState::Stopping, false) => {
                    debug!(reason = %stop.reason, "Stop already in progress");
                    return Ok(());
                },
                (SupervisorState::Stopping, true) if stop.dispatch_once => {
                    debug!(reason = %stop.reason, "Stop already in progress");
                    return Ok(());
                },
                (SupervisorState::Stopping, true) => {
                    shared.phase = SupervisorState::Killing;
                    shared.respawn = shared.respawn || stop.respawn;
                },
                (SupervisorState::Starting | SupervisorState::Running, kill) => {
                    shared.phase = if kill {
                        SupervisorState::Killing
                    } else {
                        SupervisorState::Stopping
                    };
                    shared.respawn = stop.respawn;
                },
            }
            (stop.kill, shared.respawn)
        };

        info!(reason = %stop.reason, respawn, kill, "Stopping server");
        if stop.announce {
            self.dispatch(ServerStopping {
                reason: stop.reason.clone(),
                respawn,
                kill,
            })
            .await;
        }

        if kill {
            self.kill_child();
        } else {
            self.request_graceful_stop(respawn);
        }
        Ok(())
    }

    fn kill_child(&self) {
        let mut guard = self.shared();
        let shared = &mut *guard;
        if shared.phase != SupervisorState::Killing {
            return;
        }
        if let Some(guard) = shared.failsafe.take() {
            guard.cancel();
        }
        if let Some(kill) = &shared.kill {
            if kill.send(()).is_ok() {
                shared.kills_issued = shared.kills_issued.saturating_add(1);
                warn!(pid = ?shared.pid, "Killing server process");
            }
        }
    }

    fn request_graceful_stop(&self, respawn: bool) {
        let mut shared = self.shared();
        if shared.phase != SupervisorState::Stopping {
            return;
        }
        let command = self.inner.config.stop_command.clone();
        match &shared.stdin {
            Some(stdin) => {
                if stdin.send(command).is_err() {
                    warn!("Could not write stop command, stdin is closed");
                }
            },
            None => debug!("Launch still pending, stop command deferred"),
        }

        let timeout = self.inner.config.stop_timeout;
        let weak = Arc::downgrade(&self.inner);
        shared.failsafe = Some(TimeoutGuard::arm(timeout, move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let sup = Supervisor { inner };
            warn!(
                timeout_secs = timeout.as_secs(),
                "Server did not stop in time, escalating to kill"
            );
            sup.dispatch(
                Console::new(
                    "overseer",
                    "notice",
                    format!("server did not stop within {}s, killing it", timeout.as_secs()),
                )
                .with_level("WARN"),
            )
            .await;
            let mut escalate = ServerStop::new("failsafe: stop timed out").kill().quiet();
            escalate.respawn = respawn;
            sup.dispatch(escalate).await;
        }));
    }

    async fn on_input(self, input: ServerInput) -> anyhow::Result<()> {
        let sent = self
            .shared()
            .stdin
            .as_ref()
            .map(|stdin| stdin.send(input.line.clone()).is_ok());
        match sent {
            Some(true) => trace!(line = %input.line, "Wrote to server stdin"),
            _ => warn!(line = %input.line, "Server is not running, dropping input"),
        }
        Ok(())
    }

    async fn on_starting(self) -> anyhow::Result<()> {
        let interval = self.inner.config.stats_interval;
        let weak = Arc::downgrade(&self.inner);
        let task = schedule_repeating(interval, false, move || {
            let sample = weak.upgrade().and_then(|inner| {
                let sup = Supervisor { inner };
                let pid = sup.pid()?;
                let stats = sup.inner.sampler.sample(pid)?;
                Some((sup, stats))
            });
            async move {
                if let Some((sup, stats)) = sample {
                    sup.dispatch(StatProcess {
                        cpu: stats.cpu,
                        memory: stats.memory,
                    })
                    .await;
                }
            }
        });
        if let Some(previous) = self.shared().stats.replace(task) {
            previous.cancel();
        }
        Ok(())
    }

    async fn on_stopped(self) -> anyhow::Result<()> {
        if let Some(task) = self.shared().stats.take() {
            task.cancel();
        }
        Ok(())
    }

    async fn on_exit(self, generation: u64, outcome: std::io::Result<ExitOutcome>) {
        let (prior, respawn) = {
            let mut shared = self.shared();
            if shared.generation != generation {
                return;
            }
            let prior = shared.phase;
            shared.phase = SupervisorState::Stopped;
            shared.pid = None;
            shared.stdin = None;
            shared.kill = None;
            if let Some(guard) = shared.failsafe.take() {
                guard.cancel();
            }
            (prior, shared.respawn)
        };

        let requested = matches!(prior, SupervisorState::Stopping | SupervisorState::Killing);
        let exit_code = outcome.as_ref().ok().and_then(|o| o.code);
        match &outcome {
            Ok(status) => info!(status = %status, previous = %prior, "Server process exited"),
            Err(err) => error!(error = %err, previous = %prior, "Lost track of server process"),
        }

        self.dispatch(ServerStopped { exit_code }).await;

        if requested {
            if respawn {
                self.dispatch(ServerStart {}).await;
            }
            self.mark_terminated_if_down();
            return;
        }

        let detail = match outcome {
            Ok(status) if status.success() => {
                info!("Server exited on its own");
                self.mark_terminated_if_down();
                return;
            },
            Ok(status) => status.to_string(),
            Err(err) => format!("wait failed: {err}"),
        };
        warn!(detail = %detail, "Server crashed");
        self.dispatch(ServerEvent::new(
            "server/crash",
            format!("server crashed ({detail})"),
            3,
        ))
        .await;
        self.dispatch(FatalError {
            reason: format!("server crashed ({detail})"),
        })
        .await;
        self.mark_terminated_if_down();
    }
}

async fn wait_for_exit(
    mut control: Box<dyn ChildControl>,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
) -> std::io::Result<ExitOutcome> {
    loop {
        tokio::select! {
            result = control.wait() => return result,
            request = kill_rx.recv() => match request {
                Some(()) => {
                    if let Err(err) = control.start_kill() {
                        warn!(error = %err, "Kill failed");
                    }
                },
                None => return control.wait().await,
            },
        }
    }
}

async fn write_stdin(
    mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        let result = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        }
        .await;
        if let Err(err) = result {
            warn!(error = %err, "Server stdin closed");
            break;
        }
    }
}

async fn pump_output(
    dispatcher: Dispatcher,
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    stream: &'static str,
) {
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(stream, error = %err, "Error reading server output");
                break;
            },
        };
        for line in decoder.feed(buf.get(..read).unwrap_or_default()) {
            dispatcher.dispatch(decode_output(&line)).await;
        }
    }
    if let Some(line) = decoder.finish() {
        dispatcher.dispatch(decode_output(&line)).await;
    }
    debug!(stream, "Server output closed");
}
