//! Attach server tests over a real socket in a scratch directory.

use std::time::Duration;

use overseer_attach::{
    AttachClient, AttachConfig, AttachError, AttachServer, ClientMessage, ServerMessage,
};
use overseer_events::{
    Console, Dispatcher, EventKind, HandlerResult, Hook, Outcome, PlayerJoin, PlayerQuit,
    Prefilter, Priority, ServerInput, StatPlayers, StatProcess, UserInput,
};
use overseer_test::{EventRecorder, init_test_logging, scratch_dir};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    _dir: TempDir,
    dispatcher: Dispatcher,
    server: AttachServer,
    recorder: EventRecorder,
}

/// Hooks are left out of the recorder so unknown commands stay unhandled.
async fn harness(scrollback: usize) -> Harness {
    init_test_logging();
    let dir = scratch_dir();
    let dispatcher = Dispatcher::new();
    let kinds: Vec<EventKind> = EventKind::ALL
        .into_iter()
        .filter(|k| *k != EventKind::Hook)
        .collect();
    let recorder = EventRecorder::attach_kinds(&dispatcher, &kinds);
    let config = AttachConfig::new(dir.path().join("survival.sock"))
        .with_scrollback(scrollback)
        .with_patterns([("join", r"(?P<user>\w+) joined the game")]);
    let server = AttachServer::new(config, dispatcher.clone());
    server.install().unwrap();
    server.start().await.unwrap();
    Harness {
        _dir: dir,
        dispatcher,
        server,
        recorder,
    }
}

impl Harness {
    async fn client(&self, user: &str) -> AttachClient {
        let mut client = AttachClient::connect(self.server.socket_path())
            .await
            .unwrap();
        client.attach(user).await.unwrap();
        let patterns = next_matching(&mut client, |m| match m {
            ServerMessage::Regex { patterns } => Some(patterns),
            _ => None,
        })
        .await;
        assert!(patterns.contains_key("join"));
        client
    }
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

fn console_data(message: ServerMessage) -> Option<String> {
    match message {
        ServerMessage::Console { line } => Some(line.data),
        _ => None,
    }
}

#[tokio::test]
async fn test_broadcast_reaches_every_attached_user() {
    let h = harness(50).await;
    let mut alice = h.client("alice").await;
    let mut bob = h.client("bob").await;

    h.dispatcher
        .dispatch(Console::new("server", "output", "Hello"))
        .await;

    assert_eq!(next_matching(&mut alice, console_data).await, "Hello");
    assert_eq!(next_matching(&mut bob, console_data).await, "Hello");
}

#[tokio::test]
async fn test_detach_is_announced_to_others() {
    let h = harness(50).await;
    let alice = h.client("alice").await;
    let mut bob = h.client("bob").await;
    assert!(h.recorder.wait_for(EventKind::UserAttach, 2, WAIT).await);

    drop(alice);

    let offline = next_matching(&mut bob, |m| match m {
        ServerMessage::UserStatus {
            user,
            online: false,
        } => Some(user),
        _ => None,
    })
    .await;
    assert_eq!(offline, "alice");
    assert!(h.recorder.wait_for(EventKind::UserDetach, 1, WAIT).await);
    assert_eq!(h.server.users(), vec!["bob".to_string()]);
}

#[tokio::test]
async fn test_unattached_session_gets_no_broadcasts() {
    let h = harness(50).await;
    let mut lurker = AttachClient::connect(h.server.socket_path())
        .await
        .unwrap();
    let mut alice = h.client("alice").await;

    h.dispatcher
        .dispatch(Console::new("server", "output", "first"))
        .await;
    assert_eq!(next_matching(&mut alice, console_data).await, "first");

    lurker.send(&ClientMessage::GetUsers).await.unwrap();
    let reply = timeout(WAIT, lurker.recv()).await.unwrap().unwrap();
    assert_eq!(
        reply,
        Some(ServerMessage::Users {
            users: vec!["alice".to_string()]
        })
    );
}

#[tokio::test]
async fn test_plain_input_goes_to_the_server() {
    let h = harness(50).await;
    let mut alice = h.client("alice").await;

    alice.input("alice", "say hi").await.unwrap();

    assert!(h.recorder.wait_for(EventKind::ServerInput, 1, WAIT).await);
    assert_eq!(
        h.recorder.of::<ServerInput>(),
        vec![ServerInput::new("say hi")]
    );
}

#[tokio::test]
async fn test_prefixed_input_becomes_a_hook() {
    let h = harness(50).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    h.dispatcher
        .on::<Hook, _, _>(Priority::NORMAL, Prefilter::name("ping"), move |hook| {
            let _ = tx.send(hook);
            async { HandlerResult::Ok(Outcome::NONE) }
        })
        .unwrap();
    let mut alice = h.client("alice").await;

    alice.input("alice", "~ping  now").await.unwrap();

    let hook = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(hook.name, "ping");
    assert_eq!(hook.args, "now");
    assert_eq!(hook.user.as_deref(), Some("alice"));
    assert!(h.recorder.of::<ServerInput>().is_empty());
}

#[tokio::test]
async fn test_unknown_command_is_reported() {
    let h = harness(50).await;
    let mut alice = h.client("alice").await;

    alice.input("alice", "~nope").await.unwrap();

    let notice = next_matching(&mut alice, |m| match m {
        ServerMessage::Console { line } if line.kind == "error" => Some(line.data),
        _ => None,
    })
    .await;
    assert_eq!(notice, "unknown command: ~nope");
}

#[tokio::test]
async fn test_bare_prefix_is_reported() {
    let h = harness(50).await;
    let mut alice = h.client("alice").await;

    alice.input("alice", "~").await.unwrap();

    let notice = next_matching(&mut alice, |m| match m {
        ServerMessage::Console { line } if line.kind == "error" => Some(line.data),
        _ => None,
    })
    .await;
    assert_eq!(notice, "unknown command: ~");
    assert!(h.recorder.of::<ServerInput>().is_empty());
}

#[tokio::test]
async fn test_input_is_attributed_to_the_attached_user() {
    let h = harness(50).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    h.dispatcher
        .on::<Hook, _, _>(Priority::NORMAL, Prefilter::name("ping"), move |hook| {
            let _ = tx.send(hook);
            async { HandlerResult::Ok(Outcome::NONE) }
        })
        .unwrap();
    let mut alice = h.client("alice").await;

    alice.input("mallory", "say hi").await.unwrap();
    alice.input("mallory", "~ping").await.unwrap();

    let hook = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(hook.user.as_deref(), Some("alice"));
    assert!(h.recorder.wait_for(EventKind::UserInput, 2, WAIT).await);
    let users: Vec<String> = h
        .recorder
        .of::<UserInput>()
        .into_iter()
        .map(|input| input.user)
        .collect();
    assert_eq!(users, vec!["alice".to_string(), "alice".to_string()]);
}

#[tokio::test]
async fn test_input_before_attach_is_rejected() {
    let h = harness(50).await;
    let mut client = AttachClient::connect(h.server.socket_path())
        .await
        .unwrap();

    let err = client
        .request(
            &ClientMessage::Input {
                user: "mallory".into(),
                line: "op mallory".into(),
            },
            |_| Some(()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AttachError::Protocol(_)));
    assert!(h.recorder.of::<ServerInput>().is_empty());
}

#[tokio::test]
async fn test_malformed_message_drops_the_session() {
    let h = harness(50).await;
    let mut raw = tokio::net::UnixStream::connect(h.server.socket_path())
        .await
        .unwrap();

    raw.write_all(b"{not json}\n").await.unwrap();

    let mut reply = String::new();
    timeout(WAIT, raw.read_to_string(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert!(reply.contains("\"type\":\"error\""));
    assert_eq!(h.server.session_count(), 0);
}

#[tokio::test]
async fn test_scrollback_replays_recent_lines() {
    let h = harness(3).await;
    for n in 1..=5 {
        h.dispatcher
            .dispatch(Console::new("server", "output", format!("line {n}")))
            .await;
    }
    let mut alice = h.client("alice").await;

    let lines = alice
        .request(&ClientMessage::GetScrollback, |m| match m {
            ServerMessage::Scrollback { lines } => Some(lines),
            _ => None,
        })
        .await
        .unwrap();

    let data: Vec<String> = lines.into_iter().map(|l| l.data).collect();
    assert_eq!(data, vec!["line 3", "line 4", "line 5"]);
}

#[tokio::test]
async fn test_players_and_stats_are_tracked() {
    let h = harness(50).await;
    h.dispatcher
        .dispatch(PlayerJoin {
            username: "Steve".into(),
            ip: None,
        })
        .await;
    h.dispatcher
        .dispatch(PlayerJoin {
            username: "Alex".into(),
            ip: None,
        })
        .await;
    h.dispatcher
        .dispatch(PlayerQuit {
            username: "Steve".into(),
            reason: None,
        })
        .await;
    h.dispatcher
        .dispatch(StatProcess {
            cpu: 3.5,
            memory: 2048,
        })
        .await;

    let mut alice = h.client("alice").await;
    let players = alice
        .request(&ClientMessage::GetPlayers, |m| match m {
            ServerMessage::Players { players } => Some(players),
            _ => None,
        })
        .await
        .unwrap();
    assert_eq!(players, vec!["Alex".to_string()]);

    let stats = alice
        .request(&ClientMessage::GetStats, |m| match m {
            ServerMessage::Stats { stats } => Some(stats),
            _ => None,
        })
        .await
        .unwrap();
    assert_eq!(stats["memory"], serde_json::json!(2048));
    assert_eq!(stats["players"], serde_json::json!(1));

    let counts: Vec<usize> = h
        .recorder
        .of::<StatPlayers>()
        .iter()
        .map(|s| s.players.len())
        .collect();
    assert_eq!(counts, vec![1, 2, 1]);
}

#[tokio::test]
async fn test_live_socket_is_not_taken_over() {
    let h = harness(50).await;
    let rival = AttachServer::new(
        AttachConfig::new(h.server.socket_path()),
        Dispatcher::new(),
    );

    let err = rival.start().await.unwrap_err();

    assert!(matches!(err, AttachError::InUse(_)));
    assert!(h.server.socket_path().exists());
}

#[tokio::test]
async fn test_stale_socket_is_replaced() {
    init_test_logging();
    let dir = scratch_dir();
    let path = dir.path().join("survival.sock");
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(path.exists());

    let server = AttachServer::new(AttachConfig::new(&path), Dispatcher::new());
    server.start().await.unwrap();

    AttachClient::connect(&path).await.unwrap();
    server.stop();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_socket_mode_is_applied() {
    use std::os::unix::fs::PermissionsExt;

    init_test_logging();
    let dir = scratch_dir();
    let path = dir.path().join("private.sock");
    let server = AttachServer::new(
        AttachConfig::new(&path).with_socket_mode(0o600),
        Dispatcher::new(),
    );
    server.start().await.unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    server.stop();
}
