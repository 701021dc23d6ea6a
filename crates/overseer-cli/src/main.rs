//! Overseer CLI - supervise Minecraft servers.
//!
//! `overseer run` is the daemon itself. Every other command is a thin
//! client talking to a running daemon over its attach socket.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod instance;
mod theme;

use commands::{attach, control, list, run, start};
use instance::Target;
use theme::Theme;

/// Overseer - Minecraft server supervisor
#[derive(Parser)]
#[command(name = "overseer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "OVERSEER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding instance sockets
    #[arg(long, global = true, env = "OVERSEER_SOCKET_DIR")]
    socket_dir: Option<PathBuf>,

    /// Name shown to other attached users
    #[arg(short, long, global = true, env = "USER", default_value = "console")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Run,

    /// Start the daemon in the background
    Start {
        /// Seconds to wait for the socket to appear
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Stop the server and its daemon
    Stop {
        /// Instance name
        name: Option<String>,
        /// Wait up to this many seconds for the daemon to exit
        #[arg(long)]
        wait: Option<u64>,
    },

    /// Kill the server immediately
    Kill {
        /// Instance name
        name: Option<String>,
        /// Wait up to this many seconds for the daemon to exit
        #[arg(long)]
        wait: Option<u64>,
    },

    /// Restart the server
    Restart {
        /// Instance name
        name: Option<String>,
    },

    /// Open an interactive console
    Attach {
        /// Instance name
        name: Option<String>,
    },

    /// Send one line to the server console
    Send {
        /// Instance name
        #[arg(short, long)]
        name: Option<String>,
        /// The line, e.g. `say hello` or `~help`
        #[arg(required = true, trailing_var_arg = true)]
        line: Vec<String>,
    },

    /// List known instances
    List,

    /// Show users, players and resource usage of an instance
    Status {
        /// Instance name
        name: Option<String>,
    },
}

async fn execute(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run => run::run_daemon(config, cli.verbose).await,
        Commands::Start { timeout } => {
            start::start_daemon(config, Duration::from_secs(timeout)).await
        },
        command => {
            let target = Target::resolve(config, cli.socket_dir)?;
            client_command(&target, &cli.user, command).await
        },
    }
}

async fn client_command(target: &Target, user: &str, command: Commands) -> Result<()> {
    match command {
        Commands::Stop { name, wait } => {
            let wait = wait.map(Duration::from_secs);
            control::daemon_command(target, name.as_deref(), user, "stop", wait).await
        },
        Commands::Kill { name, wait } => {
            let wait = wait.map(Duration::from_secs);
            control::daemon_command(target, name.as_deref(), user, "kill", wait).await
        },
        Commands::Restart { name } => {
            control::daemon_command(target, name.as_deref(), user, "restart", None).await
        },
        Commands::Attach { name } => attach::attach(&target.socket(name.as_deref())?, user).await,
        Commands::Send { name, line } => {
            let socket = target.socket(name.as_deref())?;
            control::send_line(&socket, user, &line.join(" ")).await
        },
        Commands::List => list::list(target).await,
        Commands::Status { name } => list::status(&target.socket(name.as_deref())?).await,
        Commands::Run | Commands::Start { .. } => Ok(()),
    }
}

/// The daemon runs every dispatch on one cooperative loop, so handlers only
/// interleave at `.await` points.
fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = build_runtime()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(execute(cli)));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", Theme::error(&format!("{e:#}")));
            ExitCode::FAILURE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_send_joins_words() {
        let cli = Cli::try_parse_from(["overseer", "send", "-n", "survival", "say", "hi", "all"])
            .unwrap();
        let Commands::Send { name, line } = cli.command else {
            panic!("expected send");
        };
        assert_eq!(name.as_deref(), Some("survival"));
        assert_eq!(line.join(" "), "say hi all");
    }

    #[test]
    fn test_runtime_is_single_threaded() {
        let runtime = build_runtime().unwrap();
        assert_eq!(
            runtime.handle().runtime_flavor(),
            tokio::runtime::RuntimeFlavor::CurrentThread
        );
    }

    #[test]
    fn test_send_requires_a_line() {
        assert!(Cli::try_parse_from(["overseer", "send"]).is_err());
    }
}
