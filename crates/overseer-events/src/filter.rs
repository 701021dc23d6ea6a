//! Registration-time prefilters.
//!
//! A [`Prefilter`] is a bag of key/value arguments supplied when a handler is
//! registered. It is checked against the event kind's accepted keys and
//! compiled once, so matching at dispatch time never fails.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{DispatchError, DispatchResult};
use crate::event::{Event, EventKind};

/// Raw prefilter arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefilter {
    args: BTreeMap<String, String>,
}

impl Prefilter {
    /// An empty prefilter that accepts every event of the kind.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument.
    #[must_use]
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Shorthand for a `pattern` argument on server output.
    #[must_use]
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::new().arg("pattern", pattern)
    }

    /// Shorthand for a `name` argument on hooks and pattern matches.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::new().arg("name", name)
    }

    /// Look up an argument.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// Whether no arguments are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Iterate over the arguments.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A prefilter validated and compiled for one event kind.
#[derive(Debug, Clone)]
pub(crate) enum CompiledFilter {
    Any,
    Output {
        pattern: Option<Regex>,
        level: Option<String>,
    },
    Hook {
        name: Option<String>,
    },
    Chat {
        username: Option<String>,
    },
    Pattern {
        name: Option<String>,
    },
    Console {
        kind: Option<String>,
    },
}

impl CompiledFilter {
    pub(crate) fn compile(kind: EventKind, prefilter: &Prefilter) -> DispatchResult<Self> {
        let allowed = kind.prefilter_keys();
        for (key, _) in prefilter.iter() {
            if !allowed.contains(&key) {
                return Err(DispatchError::UnknownFilterKey {
                    kind,
                    key: key.to_string(),
                });
            }
        }

        let owned = |key: &str| prefilter.get(key).map(str::to_string);

        let compiled = match kind {
            EventKind::ServerOutput => {
                let pattern = prefilter.get("pattern").map(compile_regex).transpose()?;
                let level = prefilter
                    .get("level")
                    .filter(|l| !matches!(*l, "*" | "any"))
                    .map(str::to_ascii_uppercase);
                Self::Output { pattern, level }
            },
            EventKind::Hook => {
                if let Some(public) = prefilter.get("public") {
                    parse_bool("public", public)?;
                }
                Self::Hook {
                    name: owned("name"),
                }
            },
            EventKind::PlayerChat => Self::Chat {
                username: owned("username"),
            },
            EventKind::PatternMatch => Self::Pattern {
                name: owned("name"),
            },
            EventKind::Console => Self::Console {
                kind: owned("kind"),
            },
            _ => Self::Any,
        };
        Ok(compiled)
    }

    pub(crate) fn matches(&self, event: &Event) -> bool {
        match (self, event) {
            (Self::Any, _) => true,
            (Self::Output { pattern, level }, Event::ServerOutput(out)) => {
                level
                    .as_ref()
                    .is_none_or(|l| out.level.eq_ignore_ascii_case(l))
                    && pattern.as_ref().is_none_or(|re| re.is_match(&out.data))
            },
            (Self::Hook { name }, Event::Hook(hook)) => {
                name.as_ref().is_none_or(|n| *n == hook.name)
            },
            (Self::Chat { username }, Event::PlayerChat(chat)) => username
                .as_ref()
                .is_none_or(|u| u.eq_ignore_ascii_case(&chat.username)),
            (Self::Pattern { name }, Event::PatternMatch(m)) => {
                name.as_ref().is_none_or(|n| *n == m.name)
            },
            (Self::Console { kind }, Event::Console(line)) => {
                kind.as_ref().is_none_or(|k| *k == line.kind)
            },
            _ => false,
        }
    }
}

/// Compile a regex, mapping failures into a [`DispatchError`].
///
/// # Errors
///
/// Returns [`DispatchError::InvalidPattern`] if the pattern does not compile.
pub fn compile_regex(pattern: &str) -> DispatchResult<Regex> {
    Regex::new(pattern).map_err(|source| DispatchError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn parse_bool(key: &str, value: &str) -> DispatchResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(DispatchError::InvalidFilterValue {
            key: key.to_string(),
            value: value.to_string(),
            message: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Hook, PlayerChat, ServerOutput};

    fn output(level: &str, data: &str) -> Event {
        ServerOutput {
            line: data.to_string(),
            time: None,
            level: level.to_string(),
            data: data.to_string(),
        }
        .into()
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = CompiledFilter::compile(EventKind::PlayerJoin, &Prefilter::pattern("x"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownFilterKey { key, .. } if key == "pattern"));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let err = CompiledFilter::compile(EventKind::ServerOutput, &Prefilter::pattern("(unclosed"))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPattern { .. }));
    }

    #[test]
    fn test_bad_bool_rejected() {
        let filter = Prefilter::name("help").arg("public", "maybe");
        let err = CompiledFilter::compile(EventKind::Hook, &filter).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidFilterValue { .. }));
    }

    #[test]
    fn test_output_pattern_and_level() {
        let filter = Prefilter::pattern(r"^Done \(").arg("level", "info");
        let compiled = CompiledFilter::compile(EventKind::ServerOutput, &filter).unwrap();
        assert!(compiled.matches(&output("INFO", "Done (3.2s)! For help, type \"help\"")));
        assert!(!compiled.matches(&output("WARN", "Done (3.2s)!")));
        assert!(!compiled.matches(&output("INFO", "Preparing level")));
    }

    #[test]
    fn test_wildcard_level() {
        let filter = Prefilter::new().arg("level", "*");
        let compiled = CompiledFilter::compile(EventKind::ServerOutput, &filter).unwrap();
        assert!(compiled.matches(&output("unknown", "anything")));
    }

    #[test]
    fn test_hook_name_exact() {
        let compiled = CompiledFilter::compile(EventKind::Hook, &Prefilter::name("stop")).unwrap();
        let hook = |name: &str| -> Event {
            Hook {
                name: name.to_string(),
                args: String::new(),
                line: String::new(),
                is_command: true,
                user: None,
            }
            .into()
        };
        assert!(compiled.matches(&hook("stop")));
        assert!(!compiled.matches(&hook("stop-in")));
    }

    #[test]
    fn test_chat_username_case_insensitive() {
        let filter = Prefilter::new().arg("username", "Alice");
        let compiled = CompiledFilter::compile(EventKind::PlayerChat, &filter).unwrap();
        let chat: Event = PlayerChat {
            username: "alice".into(),
            message: "hi".into(),
        }
        .into();
        assert!(compiled.matches(&chat));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let compiled = CompiledFilter::compile(EventKind::ServerOutput, &Prefilter::new()).unwrap();
        assert!(compiled.matches(&output("INFO", "x")));
    }
}
