//! Wire messages.
//!
//! One JSON object per line, tagged by `type`:
//!
//! ```text
//! {"type":"attach","user":"alice"}
//! {"type":"input","user":"alice","line":"say hi"}
//! {"type":"console","line":{"source":"server","kind":"output",...}}
//! ```

use std::collections::BTreeMap;

use overseer_events::Console;
use serde::{Deserialize, Serialize};

use crate::error::{AttachError, AttachResult};

/// Longest accepted line, in bytes.
pub const MAX_LINE: usize = 64 * 1024;

/// Client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identify and start receiving broadcasts.
    Attach {
        /// Display name.
        user: String,
    },
    /// A typed line.
    Input {
        /// Display name.
        user: String,
        /// The line.
        line: String,
    },
    /// Replay the scrollback buffer.
    GetScrollback,
    /// Online players.
    GetPlayers,
    /// Latest resource sample.
    GetStats,
    /// Attached users.
    GetUsers,
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One console line.
    Console {
        /// The line.
        line: Console,
    },
    /// A user attached or detached.
    UserStatus {
        /// Display name.
        user: String,
        /// `true` on attach.
        online: bool,
    },
    /// Recent console history, oldest first.
    Scrollback {
        /// The lines.
        lines: Vec<Console>,
    },
    /// Online players.
    Players {
        /// Usernames, sorted.
        players: Vec<String>,
    },
    /// Latest resource sample.
    Stats {
        /// Named values.
        stats: BTreeMap<String, serde_json::Value>,
    },
    /// Attached users.
    Users {
        /// Display names, sorted.
        users: Vec<String>,
    },
    /// Active console patterns by name.
    Regex {
        /// Pattern name to regex.
        patterns: BTreeMap<String, String>,
    },
    /// The request was rejected.
    Error {
        /// Why.
        message: String,
    },
}

/// Encode a message as one line, without the trailing newline.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> AttachResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one client line.
///
/// # Errors
///
/// Returns [`AttachError::Protocol`] for anything that isn't a known message.
pub fn decode_client(line: &str) -> AttachResult<ClientMessage> {
    serde_json::from_str(line).map_err(|e| AttachError::Protocol(e.to_string()))
}

/// Decode one server line.
///
/// # Errors
///
/// Returns [`AttachError::Protocol`] for anything that isn't a known message.
pub fn decode_server(line: &str) -> AttachResult<ServerMessage> {
    serde_json::from_str(line).map_err(|e| AttachError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_wire_format() {
        let line = encode(&ClientMessage::Input {
            user: "alice".into(),
            line: "say hi".into(),
        })
        .unwrap();
        assert_eq!(line, r#"{"type":"input","user":"alice","line":"say hi"}"#);
        assert_eq!(
            decode_client(r#"{"type":"get_scrollback"}"#).unwrap(),
            ClientMessage::GetScrollback
        );
    }

    #[test]
    fn test_console_message_nests_line() {
        let message = ServerMessage::Console {
            line: Console::new("server", "output", "Done").with_level("INFO"),
        };
        let value: serde_json::Value = serde_json::from_str(&encode(&message).unwrap()).unwrap();
        assert_eq!(value["type"], "console");
        assert_eq!(value["line"]["data"], "Done");
        assert_eq!(value["line"]["level"], "INFO");
    }

    #[test]
    fn test_malformed_is_protocol_error() {
        assert!(matches!(
            decode_client("not json"),
            Err(AttachError::Protocol(_))
        ));
        assert!(matches!(
            decode_client(r#"{"type":"format_disk"}"#),
            Err(AttachError::Protocol(_))
        ));
        assert!(matches!(
            decode_client(r#"{"type":"attach"}"#),
            Err(AttachError::Protocol(_))
        ));
    }
}
