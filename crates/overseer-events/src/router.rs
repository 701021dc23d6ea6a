//! Turns server output lines into player and pattern events.
//!
//! The router holds an ordered list of rules. Each rule is a regex checked
//! against the message body of every `server_output` event (optionally
//! restricted to one level). Every rule that matches produces an event, so
//! one line can yield several.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::dispatcher::{Dispatcher, HandlerResult, Outcome, Priority, RegistrationId};
use crate::error::{DispatchError, DispatchResult};
use crate::event::{Event, PatternMatch, PlayerChat, PlayerDeath, PlayerJoin, PlayerQuit, ServerOutput};
use crate::filter::{Prefilter, compile_regex};

/// What a matching rule produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    /// `player_chat`, needs `username` and `message` captures.
    Chat,
    /// `player_join`, needs `username`, may capture `ip`.
    Join,
    /// `player_quit`, needs `username`, may capture `reason`.
    Quit,
    /// `player_death`, needs `username`, may capture `text`.
    Death,
    /// `pattern_match` with this name, any captures.
    Pattern(String),
}

impl RouteTarget {
    /// Display name of the target.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::Join => "join",
            Self::Quit => "quit",
            Self::Death => "death",
            Self::Pattern(name) => name,
        }
    }

    fn required_captures(&self) -> &'static [&'static str] {
        match self {
            Self::Chat => &["username", "message"],
            Self::Join | Self::Quit | Self::Death => &["username"],
            Self::Pattern(_) => &[],
        }
    }

    fn build(&self, regex: &Regex, output: &ServerOutput, caps: &Captures<'_>) -> Event {
        let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
        let username = group("username").unwrap_or_default();
        match self {
            Self::Chat => PlayerChat {
                username,
                message: group("message").unwrap_or_default(),
            }
            .into(),
            Self::Join => PlayerJoin {
                username,
                ip: group("ip"),
            }
            .into(),
            Self::Quit => PlayerQuit {
                username,
                reason: group("reason"),
            }
            .into(),
            Self::Death => PlayerDeath {
                username,
                text: group("text").unwrap_or_else(|| output.data.clone()),
            }
            .into(),
            Self::Pattern(name) => PatternMatch {
                name: name.clone(),
                line: output.data.clone(),
                captures: regex
                    .capture_names()
                    .flatten()
                    .filter_map(|n| group(n).map(|v| (n.to_string(), v)))
                    .collect(),
            }
            .into(),
        }
    }
}

/// A routing rule as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Event produced on match.
    pub target: RouteTarget,
    /// Regex tested against the message body.
    pub pattern: String,
    /// Only consider lines at this level.
    #[serde(default)]
    pub level: Option<String>,
}

impl RouteRule {
    /// Create a rule that matches at any level.
    #[must_use]
    pub fn new(target: RouteTarget, pattern: impl Into<String>) -> Self {
        Self {
            target,
            pattern: pattern.into(),
            level: None,
        }
    }

    /// Restrict the rule to one level.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }
}

/// Identifier of a route rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(u64);

struct CompiledRule {
    rule: RouteRule,
    regex: Regex,
}

struct RouterInner {
    dispatcher: Dispatcher,
    rules: Mutex<BTreeMap<RouteId, Arc<CompiledRule>>>,
    next_id: AtomicU64,
    registration: Mutex<Option<RegistrationId>>,
}

/// Console line router.
#[derive(Clone)]
pub struct ConsoleLineRouter {
    inner: Arc<RouterInner>,
}

impl std::fmt::Debug for ConsoleLineRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleLineRouter")
            .field("rules", &self.rules().len())
            .finish_non_exhaustive()
    }
}

impl ConsoleLineRouter {
    /// Create a router that dispatches through `dispatcher`.
    ///
    /// Call [`install`](Self::install) to start receiving output.
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                dispatcher,
                rules: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                registration: Mutex::new(None),
            }),
        }
    }

    fn rules(&self) -> MutexGuard<'_, BTreeMap<RouteId, Arc<CompiledRule>>> {
        self.inner
            .rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the router's `server_output` handler. Idempotent.
    ///
    /// The handler holds only a weak reference, so dropping every router
    /// handle turns it into a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if registration fails.
    pub fn install(&self) -> DispatchResult<()> {
        let mut slot = self
            .inner
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }
        let weak: Weak<RouterInner> = Arc::downgrade(&self.inner);
        let id = self.inner.dispatcher.on::<ServerOutput, _, _>(
            Priority::HIGH,
            Prefilter::new(),
            move |output| {
                let router = weak.upgrade().map(|inner| ConsoleLineRouter { inner });
                async move {
                    if let Some(router) = router {
                        router.route(&output).await;
                    }
                    HandlerResult::Ok(Outcome::NONE)
                }
            },
        )?;
        *slot = Some(id);
        Ok(())
    }

    /// Remove the router's handler. Rules are kept.
    pub fn uninstall(&self) {
        let id = self
            .inner
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.inner.dispatcher.unregister(id);
        }
    }

    /// Add a rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern doesn't compile or lacks a named
    /// capture the target requires.
    pub fn add_rule(&self, rule: RouteRule) -> DispatchResult<RouteId> {
        let regex = compile_regex(&rule.pattern)?;
        for capture in rule.target.required_captures() {
            if !regex.capture_names().flatten().any(|n| n == *capture) {
                return Err(DispatchError::MissingCapture {
                    target: rule.target.name().to_string(),
                    capture: (*capture).to_string(),
                });
            }
        }
        let id = RouteId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(target_name = rule.target.name(), pattern = %rule.pattern, "Route added");
        self.rules().insert(id, Arc::new(CompiledRule { rule, regex }));
        Ok(id)
    }

    /// Remove a rule. Returns `false` if it was already gone.
    pub fn remove_rule(&self, id: RouteId) -> bool {
        self.rules().remove(&id).is_some()
    }

    /// Current rules in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<RouteRule> {
        self.rules().values().map(|c| c.rule.clone()).collect()
    }

    /// Target names paired with their patterns, for display by clients.
    #[must_use]
    pub fn patterns(&self) -> Vec<(String, String)> {
        self.rules()
            .values()
            .map(|c| (c.rule.target.name().to_string(), c.rule.pattern.clone()))
            .collect()
    }

    /// Evaluate every rule against one line and dispatch what matches.
    ///
    /// Returns the number of events dispatched.
    pub async fn route(&self, output: &ServerOutput) -> usize {
        let snapshot: Vec<Arc<CompiledRule>> = self.rules().values().cloned().collect();
        let mut produced = Vec::new();
        for compiled in &snapshot {
            if let Some(level) = &compiled.rule.level {
                if !output.level.eq_ignore_ascii_case(level) {
                    continue;
                }
            }
            if let Some(caps) = compiled.regex.captures(&output.data) {
                trace!(target_name = compiled.rule.target.name(), "Route matched");
                produced.push(compiled.rule.target.build(&compiled.regex, output, &caps));
            }
        }

        let count = produced.len();
        for event in produced {
            self.inner.dispatcher.dispatch(event).await;
        }
        count
    }
}
