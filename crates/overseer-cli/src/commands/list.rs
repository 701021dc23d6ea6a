//! Listing instances and querying one.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use overseer_attach::{AttachClient, ClientMessage, ServerMessage, list_instances, socket_path};

use crate::instance::Target;
use crate::theme::Theme;

/// Print every instance with a socket in the socket directory.
pub(crate) async fn list(target: &Target) -> Result<()> {
    let names = list_instances(&target.socket_dir)?;
    if names.is_empty() {
        println!(
            "{}",
            Theme::info(&format!(
                "No instances in {}",
                target.socket_dir.display()
            ))
        );
        return Ok(());
    }

    println!("\n{}", Theme::header("Instances"));
    println!("{:<24} {}", "NAME".dimmed(), "STATUS".dimmed());
    println!("{}", Theme::separator());
    for name in names {
        let socket = socket_path(&target.socket_dir, &name);
        let status = if AttachClient::connect(&socket).await.is_ok() {
            "running".green()
        } else {
            "stale socket".yellow()
        };
        println!("{name:<24} {status}");
    }
    println!();
    Ok(())
}

/// Print attached users, online players and the latest resource sample.
pub(crate) async fn status(socket: &Path) -> Result<()> {
    let mut client = AttachClient::connect(socket).await?;
    let users = client
        .request(&ClientMessage::GetUsers, |reply| match reply {
            ServerMessage::Users { users } => Some(users),
            _ => None,
        })
        .await?;
    let players = client
        .request(&ClientMessage::GetPlayers, |reply| match reply {
            ServerMessage::Players { players } => Some(players),
            _ => None,
        })
        .await?;
    let stats = client
        .request(&ClientMessage::GetStats, |reply| match reply {
            ServerMessage::Stats { stats } => Some(stats),
            _ => None,
        })
        .await?;

    println!("\n{}", Theme::header(&socket.display().to_string()));
    println!("{}", Theme::separator());
    println!("{:<10} {}", "users".dimmed(), users.join(", "));
    println!(
        "{:<10} {} {}",
        "players".dimmed(),
        players.len(),
        Theme::dimmed(&players.join(", "))
    );
    for (key, value) in &stats {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("{:<10} {value}", key.as_str().dimmed());
    }
    println!();
    Ok(())
}
