//! Run the daemon in the foreground.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use overseer_daemon::config_bridge::to_log_config;
use overseer_daemon::{Manager, ManagerOptions};

use crate::instance::locate_config;

/// Supervise the configured server until it stops for good or Ctrl+C.
pub(crate) async fn run_daemon(config: Option<&Path>, verbose: bool) -> Result<()> {
    let path = locate_config(config)?;
    let config = overseer_config::load_file(&path)?;

    let mut log_config = to_log_config(&config);
    if verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = overseer_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let name = config.server.name.clone();
    let manager = Manager::start(config, ManagerOptions::default().with_config_path(&path)).await?;
    println!(
        "{}",
        format!(
            "overseer supervising '{name}' (socket {})",
            manager.attach().socket_path().display()
        )
        .cyan()
        .bold()
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\n{}", "Shutting down...".yellow());
        },
        () = manager.wait_terminated() => {},
    }

    manager.shutdown().await;
    println!("{}", "Daemon stopped".dimmed());
    Ok(())
}
