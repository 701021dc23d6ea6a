//! Event types flowing through the supervisor.
//!
//! Every event is a variant of the closed [`Event`] enum. Each variant wraps
//! a payload struct so handlers registered through
//! [`Dispatcher::on`](crate::Dispatcher::on) receive the concrete type
//! directly. Serialized form is a flat object tagged with `type`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current wall-clock time formatted the way console lines carry it.
#[must_use]
pub fn clock_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn default_true() -> bool {
    true
}

/// A line destined for the child's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInput {
    /// Raw line, without trailing newline.
    pub line: String,
}

impl ServerInput {
    /// Create a new input event.
    #[must_use]
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }
}

/// A decoded line from the child's stdout or stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOutput {
    /// The raw line as read.
    pub line: String,
    /// `HH:MM:SS` timestamp if the line carried one.
    #[serde(default)]
    pub time: Option<String>,
    /// Level tag, `"unknown"` if the line didn't parse.
    pub level: String,
    /// Message body.
    pub data: String,
}

/// A human-readable line for the console display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Console {
    /// Where the line came from (`server`, `user`, `overseer`, a plugin name).
    pub source: String,
    /// Line category (`output`, `input`, `joinpart`, `notice`, `error`).
    pub kind: String,
    /// Text to show.
    pub data: String,
    /// Originating user, if any.
    #[serde(default)]
    pub user: Option<String>,
    /// Log level carried over from server output.
    #[serde(default)]
    pub level: Option<String>,
    /// Local `HH:MM:SS` time the line was produced.
    pub time: String,
}

impl Console {
    /// Create a console line stamped with the current time.
    #[must_use]
    pub fn new(source: impl Into<String>, kind: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            kind: kind.into(),
            data: data.into(),
            user: None,
            level: None,
            time: clock_time(),
        }
    }

    /// Attach the originating user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Attach a level tag.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Override the time stamp.
    #[must_use]
    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = time.into();
        self
    }

    /// Render the line the way attached clients display it.
    #[must_use]
    pub fn render(&self) -> String {
        match (self.kind.as_str(), &self.user) {
            ("input", Some(user)) => format!("{} <{user}> {}", self.time, self.data),
            (_, _) => match &self.level {
                Some(level) => format!("{} [{level}] {}", self.time, self.data),
                None => format!("{} {}", self.time, self.data),
            },
        }
    }
}

/// Request to launch the server process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStart {}

/// The child process has been spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStarting {
    /// Child process id.
    pub pid: u32,
}

/// The server reported it finished starting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStarted {}

/// Request to stop the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStop {
    /// Human-readable reason.
    pub reason: String,
    /// Start the server again once it has stopped.
    #[serde(default)]
    pub respawn: bool,
    /// Kill instead of asking nicely.
    #[serde(default)]
    pub kill: bool,
    /// Announce the stop through [`ServerStopping`] before acting.
    #[serde(default = "default_true")]
    pub announce: bool,
    /// Ignore this request if a stop is already in flight.
    #[serde(default)]
    pub dispatch_once: bool,
}

impl ServerStop {
    /// A graceful, announced stop without respawn.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            respawn: false,
            kill: false,
            announce: true,
            dispatch_once: false,
        }
    }

    /// Start the server again afterwards.
    #[must_use]
    pub fn respawn(mut self) -> Self {
        self.respawn = true;
        self
    }

    /// Kill the process instead of sending the stop command.
    #[must_use]
    pub fn kill(mut self) -> Self {
        self.kill = true;
        self
    }

    /// Skip the [`ServerStopping`] announcement.
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.announce = false;
        self
    }

    /// Only act if no stop is already in progress.
    #[must_use]
    pub fn once(mut self) -> Self {
        self.dispatch_once = true;
        self
    }
}

/// Announcement that a stop is about to happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStopping {
    /// Human-readable reason.
    pub reason: String,
    /// Whether the server will be respawned.
    pub respawn: bool,
    /// Whether the process is being killed.
    pub kill: bool,
}

/// The child process has exited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStopped {
    /// Exit status if the process exited normally.
    #[serde(default)]
    pub exit_code: Option<i32>,
}

/// Something noteworthy happened to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEvent {
    /// Short cause tag (`server/error`, `server/crash`, ...).
    pub cause: String,
    /// Details.
    pub data: String,
    /// Severity, higher is more severe.
    #[serde(default)]
    pub priority: i32,
}

impl ServerEvent {
    /// Create a new server event.
    #[must_use]
    pub fn new(cause: impl Into<String>, data: impl Into<String>, priority: i32) -> Self {
        Self {
            cause: cause.into(),
            data: data.into(),
            priority,
        }
    }
}

/// Unrecoverable supervisor error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalError {
    /// Why the supervisor cannot continue.
    pub reason: String,
}

/// Periodic process resource sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatProcess {
    /// CPU usage in percent.
    pub cpu: f32,
    /// Resident memory in bytes.
    pub memory: u64,
}

/// Current list of online players.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatPlayers {
    /// Usernames, sorted.
    pub players: Vec<String>,
}

/// An attach client identified itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttach {
    /// Username.
    pub user: String,
}

/// An attached client went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetach {
    /// Username.
    pub user: String,
}

/// A line typed by an attached user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    /// Username.
    pub user: String,
    /// Line as typed.
    pub line: String,
}

/// A named command invocation (`~name args`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Command name.
    pub name: String,
    /// Everything after the name, trimmed.
    #[serde(default)]
    pub args: String,
    /// The full line that produced this hook.
    #[serde(default)]
    pub line: String,
    /// Whether the hook came from an interactive command.
    #[serde(default)]
    pub is_command: bool,
    /// Invoking user.
    #[serde(default)]
    pub user: Option<String>,
}

impl Hook {
    /// Parse a command line with its prefix already stripped.
    ///
    /// Returns `None` for an empty line.
    #[must_use]
    pub fn parse_command(user: impl Into<String>, body: &str, line: impl Into<String>) -> Option<Self> {
        let body = body.trim();
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            args: args.to_string(),
            line: line.into(),
            is_command: true,
            user: Some(user.into()),
        })
    }

    /// Arguments split on whitespace.
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        self.args.split_whitespace().collect()
    }
}

/// A player joined the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerJoin {
    /// Player name.
    pub username: String,
    /// Remote address, when the log line carries one.
    #[serde(default)]
    pub ip: Option<String>,
}

/// A player left the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerQuit {
    /// Player name.
    pub username: String,
    /// Disconnect reason, if logged.
    #[serde(default)]
    pub reason: Option<String>,
}

/// A player said something in chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerChat {
    /// Player name.
    pub username: String,
    /// Chat message.
    pub message: String,
}

/// A player died.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDeath {
    /// Player name.
    pub username: String,
    /// The death message.
    pub text: String,
}

/// A named console pattern matched a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Name of the route that matched.
    pub name: String,
    /// Message body that matched.
    pub line: String,
    /// Named capture groups.
    #[serde(default)]
    pub captures: BTreeMap<String, String>,
}

/// Discriminant of [`Event`], used as the dispatcher's registration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum EventKind {
    ServerInput,
    ServerOutput,
    Console,
    ServerStart,
    ServerStarting,
    ServerStarted,
    ServerStop,
    ServerStopping,
    ServerStopped,
    ServerEvent,
    FatalError,
    StatProcess,
    StatPlayers,
    UserAttach,
    UserDetach,
    UserInput,
    Hook,
    PlayerJoin,
    PlayerQuit,
    PlayerChat,
    PlayerDeath,
    PatternMatch,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 22] = [
        Self::ServerInput,
        Self::ServerOutput,
        Self::Console,
        Self::ServerStart,
        Self::ServerStarting,
        Self::ServerStarted,
        Self::ServerStop,
        Self::ServerStopping,
        Self::ServerStopped,
        Self::ServerEvent,
        Self::FatalError,
        Self::StatProcess,
        Self::StatPlayers,
        Self::UserAttach,
        Self::UserDetach,
        Self::UserInput,
        Self::Hook,
        Self::PlayerJoin,
        Self::PlayerQuit,
        Self::PlayerChat,
        Self::PlayerDeath,
        Self::PatternMatch,
    ];

    /// Snake-case name, matching the serialized `type` tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServerInput => "server_input",
            Self::ServerOutput => "server_output",
            Self::Console => "console",
            Self::ServerStart => "server_start",
            Self::ServerStarting => "server_starting",
            Self::ServerStarted => "server_started",
            Self::ServerStop => "server_stop",
            Self::ServerStopping => "server_stopping",
            Self::ServerStopped => "server_stopped",
            Self::ServerEvent => "server_event",
            Self::FatalError => "fatal_error",
            Self::StatProcess => "stat_process",
            Self::StatPlayers => "stat_players",
            Self::UserAttach => "user_attach",
            Self::UserDetach => "user_detach",
            Self::UserInput => "user_input",
            Self::Hook => "hook",
            Self::PlayerJoin => "player_join",
            Self::PlayerQuit => "player_quit",
            Self::PlayerChat => "player_chat",
            Self::PlayerDeath => "player_death",
            Self::PatternMatch => "pattern_match",
        }
    }

    /// Prefilter keys accepted when registering for this kind.
    #[must_use]
    pub fn prefilter_keys(self) -> &'static [&'static str] {
        match self {
            Self::ServerOutput => &["pattern", "level"],
            Self::Hook => &["name", "public", "doc"],
            Self::PlayerChat => &["username"],
            Self::PatternMatch => &["name"],
            Self::Console => &["kind"],
            _ => &[],
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every event the supervisor can dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Event {
    // ========== Process I/O ==========
    ServerInput(ServerInput),
    ServerOutput(ServerOutput),
    Console(Console),

    // ========== Lifecycle ==========
    ServerStart(ServerStart),
    ServerStarting(ServerStarting),
    ServerStarted(ServerStarted),
    ServerStop(ServerStop),
    ServerStopping(ServerStopping),
    ServerStopped(ServerStopped),
    ServerEvent(ServerEvent),
    FatalError(FatalError),

    // ========== Statistics ==========
    StatProcess(StatProcess),
    StatPlayers(StatPlayers),

    // ========== Users ==========
    UserAttach(UserAttach),
    UserDetach(UserDetach),
    UserInput(UserInput),
    Hook(Hook),

    // ========== Players ==========
    PlayerJoin(PlayerJoin),
    PlayerQuit(PlayerQuit),
    PlayerChat(PlayerChat),
    PlayerDeath(PlayerDeath),
    PatternMatch(PatternMatch),
}

impl Event {
    /// The registration key for this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ServerInput(_) => EventKind::ServerInput,
            Self::ServerOutput(_) => EventKind::ServerOutput,
            Self::Console(_) => EventKind::Console,
            Self::ServerStart(_) => EventKind::ServerStart,
            Self::ServerStarting(_) => EventKind::ServerStarting,
            Self::ServerStarted(_) => EventKind::ServerStarted,
            Self::ServerStop(_) => EventKind::ServerStop,
            Self::ServerStopping(_) => EventKind::ServerStopping,
            Self::ServerStopped(_) => EventKind::ServerStopped,
            Self::ServerEvent(_) => EventKind::ServerEvent,
            Self::FatalError(_) => EventKind::FatalError,
            Self::StatProcess(_) => EventKind::StatProcess,
            Self::StatPlayers(_) => EventKind::StatPlayers,
            Self::UserAttach(_) => EventKind::UserAttach,
            Self::UserDetach(_) => EventKind::UserDetach,
            Self::UserInput(_) => EventKind::UserInput,
            Self::Hook(_) => EventKind::Hook,
            Self::PlayerJoin(_) => EventKind::PlayerJoin,
            Self::PlayerQuit(_) => EventKind::PlayerQuit,
            Self::PlayerChat(_) => EventKind::PlayerChat,
            Self::PlayerDeath(_) => EventKind::PlayerDeath,
            Self::PatternMatch(_) => EventKind::PatternMatch,
        }
    }

    /// Flatten the event into a field map, including its `type` tag.
    ///
    /// Used for logging and for templating user-facing messages.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Map::new();
                map.insert("type".to_string(), Value::String(self.kind().to_string()));
                map
            },
        }
    }
}

/// A payload type that maps one-to-one onto an [`Event`] variant.
pub trait EventPayload: Clone + Send + Sync + 'static {
    /// The kind this payload is dispatched under.
    const KIND: EventKind;

    /// Borrow the payload out of an event of the matching kind.
    fn from_event(event: &Event) -> Option<&Self>;
}

macro_rules! payload {
    ($($name:ident),* $(,)?) => {
        $(
            impl EventPayload for $name {
                const KIND: EventKind = EventKind::$name;

                fn from_event(event: &Event) -> Option<&Self> {
                    match event {
                        Event::$name(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$name> for Event {
                fn from(inner: $name) -> Self {
                    Event::$name(inner)
                }
            }
        )*
    };
}

payload!(
    ServerInput,
    ServerOutput,
    Console,
    ServerStart,
    ServerStarting,
    ServerStarted,
    ServerStop,
    ServerStopping,
    ServerStopped,
    ServerEvent,
    FatalError,
    StatProcess,
    StatPlayers,
    UserAttach,
    UserDetach,
    UserInput,
    Hook,
    PlayerJoin,
    PlayerQuit,
    PlayerChat,
    PlayerDeath,
    PatternMatch,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_serde_tag() {
        let event: Event = ServerStop::new("maintenance").respawn().into();
        let fields = event.to_fields();
        assert_eq!(fields["type"], Value::String(event.kind().to_string()));
        assert_eq!(fields["reason"], "maintenance");
        assert_eq!(fields["respawn"], true);
        assert_eq!(fields["announce"], true);
    }

    #[test]
    fn test_stop_defaults_on_deserialize() {
        let event: Event =
            serde_json::from_str(r#"{"type":"server_stop","reason":"x"}"#).unwrap();
        let Event::ServerStop(stop) = event else {
            panic!("wrong variant");
        };
        assert!(stop.announce);
        assert!(!stop.kill);
        assert!(!stop.dispatch_once);
    }

    #[test]
    fn test_hook_parse_command() {
        let hook = Hook::parse_command("alice", "stop-in  5m now ", "~stop-in  5m now ").unwrap();
        assert_eq!(hook.name, "stop-in");
        assert_eq!(hook.args, "5m now");
        assert_eq!(hook.argv(), vec!["5m", "now"]);
        assert!(hook.is_command);
        assert_eq!(hook.user.as_deref(), Some("alice"));

        let bare = Hook::parse_command("bob", "help", "~help").unwrap();
        assert_eq!(bare.args, "");

        assert!(Hook::parse_command("bob", "   ", "~   ").is_none());
    }

    #[test]
    fn test_payload_from_event() {
        let event: Event = PlayerChat {
            username: "alice".into(),
            message: "hi".into(),
        }
        .into();
        assert_eq!(PlayerChat::KIND, EventKind::PlayerChat);
        assert_eq!(PlayerChat::from_event(&event).unwrap().message, "hi");
        assert!(PlayerJoin::from_event(&event).is_none());
    }

    #[test]
    fn test_console_render() {
        let line = Console::new("user", "input", "hello")
            .with_user("alice")
            .with_time("12:00:00");
        assert_eq!(line.render(), "12:00:00 <alice> hello");

        let line = Console::new("server", "output", "Done")
            .with_level("INFO")
            .with_time("12:00:01");
        assert_eq!(line.render(), "12:00:01 [INFO] Done");
    }

    #[test]
    fn test_prefilter_keys() {
        assert_eq!(EventKind::ServerOutput.prefilter_keys(), &["pattern", "level"]);
        assert!(EventKind::ServerStart.prefilter_keys().is_empty());
    }
}
