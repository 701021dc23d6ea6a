//! Console line grammar.
//!
//! Server output lines look like `[date] [HH:MM:SS] [LEVEL]: rest`, where
//! the date is optional and the level may carry a thread prefix
//! (`[Server thread/INFO]`). Older servers print
//! `2013-01-01 12:00:00 [INFO] rest`, which is accepted too.

use std::sync::LazyLock;

use overseer_events::ServerOutput;
use regex::Regex;

static GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:\[?\d{4}-\d{2}-\d{2}\]?\s+)?\[?(?P<time>\d{2}:\d{2}:\d{2})\]?\s+\[(?:[^\]]*/)?(?P<level>[A-Za-z]+)\]:?\s?(?P<data>.*)$",
    )
    .expect("invalid regex")
});

/// Level assigned to lines that don't follow the grammar.
pub const UNKNOWN_LEVEL: &str = "unknown";

/// A decoded console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleRecord {
    /// `HH:MM:SS`, if present.
    pub time: Option<String>,
    /// Upper-cased level, or [`UNKNOWN_LEVEL`].
    pub level: String,
    /// Message body.
    pub data: String,
}

impl ConsoleRecord {
    /// Decode one line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        match GRAMMAR.captures(line) {
            Some(caps) => Self {
                time: caps.name("time").map(|m| m.as_str().to_string()),
                level: caps
                    .name("level")
                    .map_or_else(|| UNKNOWN_LEVEL.to_string(), |m| m.as_str().to_ascii_uppercase()),
                data: caps
                    .name("data")
                    .map(|m| m.as_str().trim_end().to_string())
                    .unwrap_or_default(),
            },
            None => Self {
                time: None,
                level: UNKNOWN_LEVEL.to_string(),
                data: line.trim().to_string(),
            },
        }
    }

    /// Build the output event for the raw line this record came from.
    #[must_use]
    pub fn into_output(self, line: &str) -> ServerOutput {
        ServerOutput {
            line: line.to_string(),
            time: self.time,
            level: self.level,
            data: self.data,
        }
    }
}

/// Parse a raw line straight into an output event.
#[must_use]
pub fn decode_output(line: &str) -> ServerOutput {
    ConsoleRecord::parse(line).into_output(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modern_line() {
        let record = ConsoleRecord::parse(
            "[14:02:11] [Server thread/INFO]: Done (4.512s)! For help, type \"help\"",
        );
        assert_eq!(record.time.as_deref(), Some("14:02:11"));
        assert_eq!(record.level, "INFO");
        assert_eq!(record.data, "Done (4.512s)! For help, type \"help\"");
    }

    #[test]
    fn test_dated_line() {
        let record = ConsoleRecord::parse("2013-04-01 08:15:00 [WARNING] Can't keep up!");
        assert_eq!(record.time.as_deref(), Some("08:15:00"));
        assert_eq!(record.level, "WARNING");
        assert_eq!(record.data, "Can't keep up!");
    }

    #[test]
    fn test_bracketed_date() {
        let record = ConsoleRecord::parse("[2024-06-01] [10:00:00] [INFO]: hello");
        assert_eq!(record.time.as_deref(), Some("10:00:00"));
        assert_eq!(record.data, "hello");
    }

    #[test]
    fn test_unparsed_line_is_unknown_and_trimmed() {
        let record = ConsoleRecord::parse("   at java.lang.Thread.run(Thread.java:750)  \r");
        assert_eq!(record.time, None);
        assert_eq!(record.level, UNKNOWN_LEVEL);
        assert_eq!(record.data, "at java.lang.Thread.run(Thread.java:750)");
    }

    #[test]
    fn test_empty_message() {
        let record = ConsoleRecord::parse("[10:00:00] [Server thread/INFO]:");
        assert_eq!(record.level, "INFO");
        assert_eq!(record.data, "");
    }

    #[test]
    fn test_decode_output_keeps_raw_line() {
        let raw = "[10:00:00] [User Authenticator #1/INFO]: UUID of player Steve is 1234";
        let out = decode_output(raw);
        assert_eq!(out.line, raw);
        assert_eq!(out.level, "INFO");
        assert_eq!(out.data, "UUID of player Steve is 1234");
    }
}
