//! The attach socket listener and its sessions.
//!
//! The server is two things at once: a set of dispatcher handlers that keep
//! the scrollback, player list and stats current and fan console lines out
//! to sessions, and a Unix socket listener that turns client messages into
//! dispatcher events.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::{SinkExt, StreamExt};
use overseer_events::{
    Console, DispatchResult, Dispatcher, EventPayload, HandlerResult, Hook, Outcome, PlayerJoin,
    PlayerQuit, Prefilter, Priority, RegistrationId, ServerInput, ServerStopped, StatPlayers,
    StatProcess, UserAttach, UserDetach, UserInput, clock_time,
};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AttachError, AttachResult};
use crate::protocol::{ClientMessage, MAX_LINE, ServerMessage, decode_client, encode};
use crate::scrollback::Scrollback;

/// Attach server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachConfig {
    /// Socket file.
    pub socket_path: PathBuf,
    /// Scrollback capacity in lines.
    pub scrollback: usize,
    /// Input lines starting with this become hooks.
    pub command_prefix: String,
    /// Unix permission bits for the socket file.
    pub socket_mode: u32,
    /// Console patterns sent to clients on attach.
    pub patterns: BTreeMap<String, String>,
}

impl AttachConfig {
    /// Defaults for a socket at `socket_path`.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            scrollback: 200,
            command_prefix: "~".to_string(),
            socket_mode: 0o660,
            patterns: BTreeMap::new(),
        }
    }

    /// Set the scrollback capacity.
    #[must_use]
    pub fn with_scrollback(mut self, lines: usize) -> Self {
        self.scrollback = lines;
        self
    }

    /// Set the command prefix.
    #[must_use]
    pub fn with_command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    /// Set the socket permission bits.
    #[must_use]
    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    /// Set the patterns advertised to clients.
    #[must_use]
    pub fn with_patterns<I, K, V>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.patterns = patterns
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }
}

/// Identifier of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

struct Session {
    tx: mpsc::UnboundedSender<ServerMessage>,
    user: Option<String>,
}

struct Shared {
    sessions: BTreeMap<SessionId, Session>,
    scrollback: Scrollback,
    players: BTreeSet<String>,
    stats: BTreeMap<String, serde_json::Value>,
}

impl Shared {
    fn broadcast(&self, message: &ServerMessage) {
        for session in self.sessions.values().filter(|s| s.user.is_some()) {
            let _ = session.tx.send(message.clone());
        }
    }

    fn send_to(&self, id: SessionId, message: ServerMessage) {
        if let Some(session) = self.sessions.get(&id) {
            let _ = session.tx.send(message);
        }
    }
}

struct Inner {
    config: AttachConfig,
    dispatcher: Dispatcher,
    shared: Mutex<Shared>,
    next_session: AtomicU64,
    shutdown: CancellationToken,
    registrations: Mutex<Vec<RegistrationId>>,
}

/// Serves attach clients on a Unix socket. Cheap to clone.
#[derive(Clone)]
pub struct AttachServer {
    inner: Arc<Inner>,
}

impl fmt::Debug for AttachServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachServer")
            .field("socket_path", &self.inner.config.socket_path)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

impl AttachServer {
    /// Create a server. Nothing is bound until [`start`](Self::start).
    #[must_use]
    pub fn new(config: AttachConfig, dispatcher: Dispatcher) -> Self {
        let scrollback = Scrollback::new(config.scrollback);
        Self {
            inner: Arc::new(Inner {
                config,
                dispatcher,
                shared: Mutex::new(Shared {
                    sessions: BTreeMap::new(),
                    scrollback,
                    players: BTreeSet::new(),
                    stats: BTreeMap::new(),
                }),
                next_session: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
                registrations: Mutex::new(Vec::new()),
            }),
        }
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The socket file.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.inner.config.socket_path
    }

    /// Open connections, attached or not.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared().sessions.len()
    }

    /// Attached users, sorted. A user attached twice appears twice.
    #[must_use]
    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .shared()
            .sessions
            .values()
            .filter_map(|s| s.user.clone())
            .collect();
        users.sort();
        users
    }

    /// Online players, sorted.
    #[must_use]
    pub fn players(&self) -> Vec<String> {
        self.shared().players.iter().cloned().collect()
    }

    /// Copy of the scrollback, oldest first.
    #[must_use]
    pub fn scrollback(&self) -> Vec<Console> {
        self.shared().scrollback.snapshot()
    }

    /// Register the server's handlers on the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if a registration is rejected.
    pub fn install(&self) -> DispatchResult<()> {
        let none = Prefilter::new;
        let ids = vec![
            self.handle::<Console, _, _>(Priority::MONITOR, none(), |s, line| s.on_console(line))?,
            self.handle::<UserAttach, _, _>(Priority::MONITOR, none(), |s, e| {
                s.on_user_status(e.user, true)
            })?,
            self.handle::<UserDetach, _, _>(Priority::MONITOR, none(), |s, e| {
                s.on_user_status(e.user, false)
            })?,
            self.handle::<PlayerJoin, _, _>(Priority::MONITOR, none(), |s, e| {
                s.on_player(e.username, true)
            })?,
            self.handle::<PlayerQuit, _, _>(Priority::MONITOR, none(), |s, e| {
                s.on_player(e.username, false)
            })?,
            self.handle::<ServerStopped, _, _>(Priority::MONITOR, none(), |s, _| {
                s.on_server_stopped()
            })?,
            self.handle::<StatProcess, _, _>(Priority::MONITOR, none(), |s, e| s.on_stats(e))?,
            self.handle::<UserInput, _, _>(Priority::LOW, none(), |s, e| s.on_user_input(e))?,
        ];
        self.inner
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids);
        Ok(())
    }

    fn handle<T, F, Fut>(
        &self,
        priority: Priority,
        prefilter: Prefilter,
        f: F,
    ) -> DispatchResult<RegistrationId>
    where
        T: EventPayload,
        F: Fn(AttachServer, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner
            .dispatcher
            .on::<T, _, _>(priority, prefilter, move |payload| {
                let pending = weak
                    .upgrade()
                    .map(|inner| f(AttachServer { inner }, payload));
                async move {
                    if let Some(pending) = pending {
                        pending.await;
                    }
                    HandlerResult::Ok(Outcome::NONE)
                }
            })
    }

    async fn on_console(self, line: Console) {
        let mut shared = self.shared();
        shared.scrollback.push(line.clone());
        shared.broadcast(&ServerMessage::Console { line });
    }

    async fn on_user_status(self, user: String, online: bool) {
        self.shared()
            .broadcast(&ServerMessage::UserStatus { user, online });
    }

    async fn on_player(self, username: String, online: bool) {
        let players = {
            let mut shared = self.shared();
            let changed = if online {
                shared.players.insert(username)
            } else {
                shared.players.remove(&username)
            };
            if !changed {
                return;
            }
            let players: Vec<String> = shared.players.iter().cloned().collect();
            shared
                .stats
                .insert("players".into(), serde_json::json!(players.len()));
            players
        };
        self.inner
            .dispatcher
            .dispatch(StatPlayers { players })
            .await;
    }

    async fn on_server_stopped(self) {
        let mut shared = self.shared();
        shared.players.clear();
        shared.stats.insert("players".into(), serde_json::json!(0));
    }

    async fn on_stats(self, stats: StatProcess) {
        let mut shared = self.shared();
        shared.stats.insert("cpu".into(), serde_json::json!(stats.cpu));
        shared
            .stats
            .insert("memory".into(), serde_json::json!(stats.memory));
        shared
            .stats
            .insert("sampled_at".into(), serde_json::json!(clock_time()));
    }

    async fn on_user_input(self, input: UserInput) {
        let prefix = self.inner.config.command_prefix.as_str();
        let Some(body) = input.line.strip_prefix(prefix) else {
            self.inner
                .dispatcher
                .dispatch(ServerInput::new(input.line))
                .await;
            return;
        };
        let Some(hook) = Hook::parse_command(input.user.clone(), body, input.line.clone()) else {
            self.report_unknown(&input.user, "").await;
            return;
        };
        let name = hook.name.clone();
        if !self.inner.dispatcher.dispatch(hook).await {
            self.report_unknown(&input.user, &name).await;
        }
    }

    async fn report_unknown(&self, user: &str, name: &str) {
        let prefix = &self.inner.config.command_prefix;
        debug!(user = %user, command = %name, "Unknown command");
        let notice = Console::new("overseer", "error", format!("unknown command: {prefix}{name}"))
            .with_level("WARN");
        self.inner.dispatcher.dispatch(notice).await;
    }

    /// Bind the socket and start accepting clients.
    ///
    /// A leftover socket file is removed unless a live server still answers
    /// on it.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::InUse`] if another instance owns the socket,
    /// or [`AttachError::Bind`] if it cannot be created.
    pub async fn start(&self) -> AttachResult<()> {
        let path = self.inner.config.socket_path.clone();
        let bind_error = |source| AttachError::Bind {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(bind_error)?;
        }
        if path.exists() {
            if UnixStream::connect(&path).await.is_ok() {
                return Err(AttachError::InUse(path.clone()));
            }
            debug!(path = %path.display(), "Removing stale attach socket");
            std::fs::remove_file(&path).map_err(bind_error)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_error)?;
        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(self.inner.config.socket_mode),
        )
        .map_err(bind_error)?;
        info!(path = %path.display(), "Listening for attach clients");

        let this = self.clone();
        tokio::spawn(async move { this.accept_loop(listener).await });
        Ok(())
    }

    async fn accept_loop(self, listener: UnixListener) {
        loop {
            let accepted = tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, _addr)) => {
                    let id = SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
                    let this = self.clone();
                    tokio::spawn(async move { this.serve(id, stream).await });
                },
                Err(e) => warn!(error = %e, "Failed to accept attach connection"),
            }
        }
        debug!("Attach listener closed");
    }

    async fn serve(self, id: SessionId, stream: UnixStream) {
        let (read, write) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared()
            .sessions
            .insert(id, Session { tx, user: None });
        let writer = tokio::spawn(write_messages(id, write, rx));
        debug!(session = %id, "Attach client connected");

        let mut reader = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE));
        loop {
            let next = tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                next = reader.next() => next,
            };
            let line = match next {
                None => break,
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!(session = %id, error = %e, "Dropping attach session");
                    break;
                },
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_client(&line) {
                Ok(message) => self.handle_message(id, message).await,
                Err(e) => {
                    warn!(session = %id, error = %e, "Malformed message, dropping attach session");
                    self.shared().send_to(
                        id,
                        ServerMessage::Error {
                            message: e.to_string(),
                        },
                    );
                    break;
                },
            }
        }

        let session = self.shared().sessions.remove(&id);
        if let Some(Session {
            user: Some(user), ..
        }) = session
        {
            info!(session = %id, user = %user, "User detached");
            self.inner.dispatcher.dispatch(UserDetach { user }).await;
        }
        let _ = writer.await;
        debug!(session = %id, "Attach client disconnected");
    }

    async fn handle_message(&self, id: SessionId, message: ClientMessage) {
        match message {
            ClientMessage::Attach { user } => self.attach(id, user).await,
            ClientMessage::Input {
                user: claimed,
                line,
            } => {
                let user = self
                    .shared()
                    .sessions
                    .get(&id)
                    .and_then(|s| s.user.clone());
                let Some(user) = user else {
                    self.shared().send_to(
                        id,
                        ServerMessage::Error {
                            message: "attach before sending input".into(),
                        },
                    );
                    return;
                };
                if claimed != user {
                    debug!(session = %id, claimed = %claimed, user = %user, "Input sent under another name");
                }
                self.inner
                    .dispatcher
                    .dispatch(UserInput { user, line })
                    .await;
            },
            ClientMessage::GetScrollback => {
                let shared = self.shared();
                let lines = shared.scrollback.snapshot();
                shared.send_to(id, ServerMessage::Scrollback { lines });
            },
            ClientMessage::GetPlayers => {
                let shared = self.shared();
                let players = shared.players.iter().cloned().collect();
                shared.send_to(id, ServerMessage::Players { players });
            },
            ClientMessage::GetStats => {
                let shared = self.shared();
                let stats = shared.stats.clone();
                shared.send_to(id, ServerMessage::Stats { stats });
            },
            ClientMessage::GetUsers => {
                let users = self.users();
                self.shared().send_to(id, ServerMessage::Users { users });
            },
        }
    }

    async fn attach(&self, id: SessionId, user: String) {
        let user = user.trim().to_string();
        if user.is_empty() {
            self.shared().send_to(
                id,
                ServerMessage::Error {
                    message: "user name required".into(),
                },
            );
            return;
        }

        let previous = {
            let mut shared = self.shared();
            let Some(session) = shared.sessions.get_mut(&id) else {
                return;
            };
            let previous = session.user.replace(user.clone());
            shared.send_to(
                id,
                ServerMessage::Regex {
                    patterns: self.inner.config.patterns.clone(),
                },
            );
            previous
        };
        if previous.as_deref() == Some(user.as_str()) {
            return;
        }
        if let Some(previous) = previous {
            self.inner
                .dispatcher
                .dispatch(UserDetach { user: previous })
                .await;
        }
        info!(session = %id, user = %user, "User attached");
        self.inner.dispatcher.dispatch(UserAttach { user }).await;
    }

    /// Stop listening, close every session and remove the socket file.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
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
        self.shared().sessions.clear();
        let path = &self.inner.config.socket_path;
        match std::fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "Removed attach socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove attach socket"),
        }
    }
}

async fn write_messages(
    id: SessionId,
    write: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    let mut sink = FramedWrite::new(write, LinesCodec::new());
    while let Some(message) = rx.recv().await {
        let line = match encode(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!(session = %id, error = %e, "Failed to encode message");
                continue;
            },
        };
        if let Err(e) = sink.send(line).await {
            debug!(session = %id, error = %e, "Attach client went away");
            break;
        }
    }
}
