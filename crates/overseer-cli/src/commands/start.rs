//! Start the daemon in the background.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use overseer_attach::{AttachClient, socket_path};
use overseer_config::Config;
use tokio::time::Instant;

use crate::instance::locate_config;
use crate::theme::Theme;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// File the detached daemon's stderr goes to.
fn stderr_log(config: &Config) -> PathBuf {
    let dir = config
        .logging
        .directory
        .as_deref()
        .map_or_else(|| config.working_dir(), |dir| config.resolve(dir));
    dir.join(format!("{}.stderr.log", config.server.name))
}

async fn is_listening(socket: &Path) -> bool {
    AttachClient::connect(socket).await.is_ok()
}

/// Spawn `overseer run` detached and wait until its socket accepts
/// connections.
pub(crate) async fn start_daemon(config: Option<&Path>, timeout: Duration) -> Result<()> {
    let path = locate_config(config)?;
    let config = overseer_config::load_file(&path)?;
    let socket = socket_path(
        &config.resolve(&config.attach.socket_dir),
        &config.server.name,
    );
    if is_listening(&socket).await {
        bail!("instance '{}' is already running", config.server.name);
    }

    let log_path = stderr_log(&config);
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let exe = std::env::current_exe().context("cannot locate the overseer binary")?;
    let mut child = Command::new(exe)
        .arg("run")
        .arg("--config")
        .arg(&path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(log)
        .process_group(0)
        .spawn()
        .context("failed to spawn the daemon")?;

    let deadline = Instant::now()
        .checked_add(timeout)
        .unwrap_or_else(Instant::now);
    loop {
        if is_listening(&socket).await {
            println!(
                "{}",
                Theme::success(&format!(
                    "Started '{}' (pid {})",
                    config.server.name,
                    child.id()
                ))
            );
            return Ok(());
        }
        if let Some(status) = child.try_wait()? {
            bail!(
                "daemon exited during startup ({status}), see {}",
                log_path.display()
            );
        }
        if Instant::now() >= deadline {
            bail!(
                "daemon did not open {} within {timeout:?}, see {}",
                socket.display(),
                log_path.display()
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_log_location() {
        let mut config =
            overseer_config::parse("[server]\nname = \"survival\"\njar = \"server.jar\"\n", "test")
                .unwrap();
        config.base_dir = Some(PathBuf::from("/srv/mc"));
        assert_eq!(
            stderr_log(&config),
            PathBuf::from("/srv/mc/survival.stderr.log")
        );

        config.logging.directory = Some(PathBuf::from("logs"));
        assert_eq!(
            stderr_log(&config),
            PathBuf::from("/srv/mc/logs/survival.stderr.log")
        );
    }
}
