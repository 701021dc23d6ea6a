//! Interactive console session.

use std::path::Path;

use anyhow::Result;
use overseer_attach::{AttachClient, ClientMessage, ClientReader, ClientWriter, ServerMessage};
use tokio::io::{AsyncBufReadExt as _, BufReader};

use crate::theme::Theme;

fn print_message(message: ServerMessage) {
    match message {
        ServerMessage::Console { line } => println!("{}", Theme::console(&line)),
        ServerMessage::Scrollback { lines } => {
            for line in &lines {
                println!("{}", Theme::console(line));
            }
            println!("{}", Theme::separator());
        },
        ServerMessage::UserStatus { user, online } => {
            let verb = if online { "attached" } else { "detached" };
            println!("{}", Theme::dimmed(&format!("{user} {verb}")));
        },
        ServerMessage::Error { message } => eprintln!("{}", Theme::error(&message)),
        ServerMessage::Players { .. }
        | ServerMessage::Stats { .. }
        | ServerMessage::Users { .. }
        | ServerMessage::Regex { .. } => {},
    }
}

async fn print_incoming(mut reader: ClientReader) -> Result<()> {
    while let Some(message) = reader.recv().await? {
        print_message(message);
    }
    Ok(())
}

async fn forward_stdin(mut writer: ClientWriter, user: &str) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        writer
            .send(&ClientMessage::Input {
                user: user.to_string(),
                line,
            })
            .await?;
    }
    Ok(())
}

/// Replay the scrollback, then print console lines and forward stdin until
/// either side closes.
pub(crate) async fn attach(socket: &Path, user: &str) -> Result<()> {
    let mut client = AttachClient::connect(socket).await?;
    client.attach(user).await?;
    client.send(&ClientMessage::GetScrollback).await?;
    println!(
        "{}",
        Theme::header(&format!("Attached to {} as {user}", socket.display()))
    );

    let (reader, writer) = client.into_split();
    tokio::select! {
        result = print_incoming(reader) => {
            result?;
            println!("{}", Theme::warning("Daemon closed the connection"));
        },
        result = forward_stdin(writer, user) => result?,
    }
    Ok(())
}
