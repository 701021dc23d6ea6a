//! One-shot commands sent over the attach socket.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use overseer_attach::AttachClient;
use tokio::time::Instant;

use crate::instance::Target;
use crate::theme::Theme;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Attach as `user`, send `line` and hang up.
pub(crate) async fn send_line(socket: &Path, user: &str, line: &str) -> Result<()> {
    if line.trim().is_empty() {
        bail!("nothing to send");
    }
    let mut client = AttachClient::connect(socket).await?;
    client.attach(user).await?;
    client.input(user, line).await?;
    Ok(())
}

/// Send one of the daemon's built-in commands, optionally waiting for the
/// daemon to exit.
pub(crate) async fn daemon_command(
    target: &Target,
    name: Option<&str>,
    user: &str,
    command: &str,
    wait: Option<Duration>,
) -> Result<()> {
    let socket = target.socket(name)?;
    send_line(&socket, user, &target.command(command)).await?;
    println!("{}", Theme::info(&format!("Sent {}", target.command(command))));

    let Some(timeout) = wait else {
        return Ok(());
    };
    let deadline = Instant::now()
        .checked_add(timeout)
        .unwrap_or_else(Instant::now);
    while socket.exists() {
        if Instant::now() >= deadline {
            bail!("daemon still running after {timeout:?}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    println!("{}", Theme::success("Daemon stopped"));
    Ok(())
}
