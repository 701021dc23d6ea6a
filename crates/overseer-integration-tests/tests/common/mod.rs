//! Shared harness: a full manager over a scratch directory and a fake
//! server process.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use overseer_daemon::{Manager, ManagerOptions};
use overseer_events::{Console, EventKind, UserInput};
use overseer_process::{ProcessSampler, ProcessStats};
use overseer_test::{DONE_LINE, EventRecorder, FakeLauncher, FakeServer, init_test_logging};
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct FixedSampler;

impl ProcessSampler for FixedSampler {
    fn sample(&self, _pid: u32) -> Option<ProcessStats> {
        Some(ProcessStats {
            cpu: 3.5,
            memory: 2048,
        })
    }
}

/// Write `overseer.toml` and an empty jar into `dir`.
///
/// `extra` lands inside `[server]` until it opens a table of its own.
pub fn write_config(dir: &Path, extra: &str) -> PathBuf {
    std::fs::write(dir.join("server.jar"), b"").unwrap();
    let path = dir.join("overseer.toml");
    let text = format!(
        "[attach]\n\
         socket_dir = \"run\"\n\
         scrollback = 50\n\
         \n\
         [server]\n\
         name = \"survival\"\n\
         jar = \"server.jar\"\n\
         stop_timeout_secs = 60\n\
         {extra}\n"
    );
    std::fs::write(&path, text).unwrap();
    path
}

/// Every kind except hooks, so unknown commands still report as unhandled.
pub fn recorded_kinds() -> Vec<EventKind> {
    EventKind::ALL
        .iter()
        .copied()
        .filter(|kind| *kind != EventKind::Hook)
        .collect()
}

pub struct Instance {
    pub dir: TempDir,
    pub config_path: PathBuf,
    pub launcher: FakeLauncher,
    pub manager: Manager,
    pub server: FakeServer,
    pub recorder: EventRecorder,
}

impl Instance {
    /// Start a manager with `extra` appended to the config. Returns once the
    /// fake server has been launched, before it prints its done line.
    pub async fn start(extra: &str) -> Self {
        Self::start_with(FakeLauncher::new(), extra).await
    }

    pub async fn start_with(launcher: FakeLauncher, extra: &str) -> Self {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(dir.path(), extra);
        let config = overseer_config::load_file(&config_path).unwrap();
        let options = ManagerOptions::default()
            .with_config_path(&config_path)
            .with_launcher(Arc::new(launcher.clone()))
            .with_sampler(Arc::new(FixedSampler));
        let manager = Manager::start(config, options).await.unwrap();
        let recorder = EventRecorder::attach_kinds(manager.dispatcher(), &recorded_kinds());
        let server = launcher.next_server_within(WAIT).await.unwrap();
        Self {
            dir,
            config_path,
            launcher,
            manager,
            server,
            recorder,
        }
    }

    /// Like [`start`](Self::start), then wait for the server to report it
    /// has started.
    pub async fn running(extra: &str) -> Self {
        Self::running_with(FakeLauncher::new(), extra).await
    }

    pub async fn running_with(launcher: FakeLauncher, extra: &str) -> Self {
        let instance = Self::start_with(launcher, extra).await;
        instance.server.emit(DONE_LINE).await;
        assert!(
            instance
                .recorder
                .wait_for(EventKind::ServerStarted, 1, WAIT)
                .await
        );
        instance
    }

    /// Type a line as `user`, exactly as an attached client would.
    pub async fn type_line(&self, user: &str, line: &str) -> bool {
        self.manager
            .dispatcher()
            .dispatch(UserInput {
                user: user.to_string(),
                line: line.to_string(),
            })
            .await
    }

    /// Console lines of `kind` recorded so far.
    pub fn console(&self, kind: &str) -> Vec<String> {
        self.recorder
            .of::<Console>()
            .into_iter()
            .filter(|line| line.kind == kind)
            .map(|line| line.data)
            .collect()
    }

    pub fn socket(&self) -> PathBuf {
        self.manager.attach().socket_path().to_path_buf()
    }
}
