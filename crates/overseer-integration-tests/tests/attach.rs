//! Attached sessions against a full manager, over the real socket.

mod common;

use std::time::Duration;

use common::{Instance, WAIT};
use overseer_attach::{AttachClient, ClientMessage, ServerMessage};
use overseer_events::{EventKind, ServerInput};
use overseer_test::{chat_line, join_line};
use tokio::time::timeout;

async fn attached(inst: &Instance, user: &str) -> AttachClient {
    let mut client = AttachClient::connect(&inst.socket()).await.unwrap();
    client.attach(user).await.unwrap();
    next_matching(&mut client, |m| match m {
        ServerMessage::Regex { patterns } => Some(patterns),
        _ => None,
    })
    .await;
    client
}

async fn next_matching<T>(
    client: &mut AttachClient,
    mut pick: impl FnMut(ServerMessage) -> Option<T>,
) -> T {
    timeout(WAIT, async {
        loop {
            let message = client.recv().await.unwrap().expect("connection closed");
            if let Some(value) = pick(message) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for message")
}

fn console_of_kind(kind: &'static str) -> impl FnMut(ServerMessage) -> Option<String> {
    move |message| match message {
        ServerMessage::Console { line } if line.kind == kind => Some(line.data),
        _ => None,
    }
}

#[tokio::test]
async fn test_two_sessions_share_the_console() {
    let mut inst = Instance::running("").await;
    let mut first = attached(&inst, "alice").await;
    let mut second = attached(&inst, "bob").await;
    assert!(inst.recorder.wait_for(EventKind::UserAttach, 2, WAIT).await);

    first.input("alice", "say hi").await.unwrap();

    assert_eq!(inst.server.next_input_within(WAIT).await.as_deref(), Some("say hi"));
    assert_eq!(inst.recorder.of::<ServerInput>(), vec![ServerInput::new("say hi")]);
    assert_eq!(next_matching(&mut first, console_of_kind("input")).await, "say hi");
    assert_eq!(next_matching(&mut second, console_of_kind("input")).await, "say hi");

    inst.server.emit(&chat_line("Steve", "hello")).await;
    assert_eq!(next_matching(&mut first, console_of_kind("output")).await, "<Steve> hello");
    assert_eq!(next_matching(&mut second, console_of_kind("output")).await, "<Steve> hello");
}

#[tokio::test]
async fn test_detached_session_is_announced() {
    let inst = Instance::running("").await;
    let first = attached(&inst, "alice").await;
    let mut second = attached(&inst, "bob").await;
    assert!(inst.recorder.wait_for(EventKind::UserAttach, 2, WAIT).await);

    drop(first);

    let offline = next_matching(&mut second, |m| match m {
        ServerMessage::UserStatus {
            user,
            online: false,
        } => Some(user),
        _ => None,
    })
    .await;
    assert_eq!(offline, "alice");
    assert!(inst.recorder.wait_for(EventKind::UserDetach, 1, WAIT).await);

    inst.server.emit(&chat_line("Steve", "still here")).await;
    assert_eq!(
        next_matching(&mut second, console_of_kind("output")).await,
        "<Steve> still here"
    );
    let users = second
        .request(&ClientMessage::GetUsers, |m| match m {
            ServerMessage::Users { users } => Some(users),
            _ => None,
        })
        .await
        .unwrap();
    assert_eq!(users, vec!["bob".to_string()]);
}

#[tokio::test]
async fn test_late_session_replays_scrollback() {
    let inst = Instance::running("").await;
    inst.server.emit(&chat_line("Steve", "before you came")).await;
    assert!(inst.recorder.wait_for(EventKind::ServerOutput, 2, WAIT).await);

    let mut late = attached(&inst, "carol").await;
    late.send(&ClientMessage::GetScrollback).await.unwrap();
    let lines = next_matching(&mut late, |m| match m {
        ServerMessage::Scrollback { lines } => Some(lines),
        _ => None,
    })
    .await;

    let data: Vec<&str> = lines.iter().map(|line| line.data.as_str()).collect();
    assert!(data.contains(&"Server started"));
    assert!(data.contains(&"<Steve> before you came"));
    assert!(data.len() <= 50);
}

#[tokio::test]
async fn test_players_and_stats_are_queryable() {
    let inst = Instance::running("stats_interval_secs = 1").await;
    inst.server.emit(&join_line("Steve")).await;
    assert!(inst.recorder.wait_for(EventKind::PlayerJoin, 1, WAIT).await);
    assert!(inst.recorder.wait_for(EventKind::StatProcess, 1, WAIT).await);

    let mut client = AttachClient::connect(&inst.socket()).await.unwrap();
    let players = client
        .request(&ClientMessage::GetPlayers, |m| match m {
            ServerMessage::Players { players } => Some(players),
            _ => None,
        })
        .await
        .unwrap();
    assert_eq!(players, vec!["Steve".to_string()]);

    let stats = client
        .request(&ClientMessage::GetStats, |m| match m {
            ServerMessage::Stats { stats } => Some(stats),
            _ => None,
        })
        .await
        .unwrap();
    assert_eq!(stats.get("cpu"), Some(&serde_json::json!(3.5)));
    assert_eq!(stats.get("memory"), Some(&serde_json::json!(2048)));
}

#[tokio::test]
async fn test_command_over_socket_stops_the_server() {
    let inst = Instance::running("").await;
    let mut client = attached(&inst, "alice").await;

    client.input("alice", "~stop").await.unwrap();

    assert_eq!(
        next_matching(&mut client, console_of_kind("status")).await,
        "Server stopping: stop requested by alice"
    );
    inst.server.exit(0);
    timeout(WAIT, inst.manager.wait_terminated())
        .await
        .expect("server never terminated");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(inst.console("error").is_empty());
}
