//! Prioritized event dispatcher.
//!
//! Handlers register for one [`EventKind`] with a [`Priority`] and an
//! optional [`Prefilter`]. Dispatch walks a snapshot of the registrations
//! in priority order (highest first, [`Priority::MONITOR`] last), awaiting
//! each handler in turn. A handler may ask to stop the chain with
//! [`Outcome::EAT`] or to be removed with [`Outcome::UNREGISTER`].
//!
//! Failing handlers never break the chain: errors and panics are logged and
//! surfaced as a `console` line, and dispatch moves on.

use std::collections::HashMap;
use std::future::Future;
use std::ops::{BitOr, BitOrAssign};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error, trace};

use crate::error::DispatchResult;
use crate::event::{Console, Event, EventKind, EventPayload};
use crate::filter::{CompiledFilter, Prefilter};
use crate::scheduler::{self, TaskHandle};

/// Handler ordering. Higher values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority(pub i16);

impl Priority {
    /// Runs before everything else.
    pub const HIGHEST: Self = Self(100);
    /// Runs early.
    pub const HIGH: Self = Self(50);
    /// Default priority.
    pub const NORMAL: Self = Self(0);
    /// Runs late.
    pub const LOW: Self = Self(-50);
    /// Observers. Always last, should not change anything.
    pub const MONITOR: Self = Self(-100);
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// What a handler asks the dispatcher to do after it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome(u8);

impl Outcome {
    /// Nothing special.
    pub const NONE: Self = Self(0);
    /// Stop delivering this event to lower-priority handlers.
    pub const EAT: Self = Self(1);
    /// Remove this handler's registration.
    pub const UNREGISTER: Self = Self(1 << 1);

    /// Whether all flags in `other` are set.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Outcome {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Outcome {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Result returned by a handler.
pub type HandlerResult = anyhow::Result<Outcome>;

/// Boxed handler future.
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// An event handler.
///
/// Implemented for any `Fn(Arc<Event>) -> impl Future<Output = HandlerResult>`.
pub trait Handler: Send + Sync + 'static {
    /// Handle one event.
    fn call(&self, event: Arc<Event>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, event: Arc<Event>) -> HandlerFuture {
        Box::pin(self(event))
    }
}

/// Identifier of a handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl std::fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reg-{}", self.0)
    }
}

/// Read-only view of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    /// Registration id.
    pub id: RegistrationId,
    /// Event kind.
    pub kind: EventKind,
    /// Priority.
    pub priority: Priority,
    /// Prefilter arguments as given.
    pub prefilter: Prefilter,
    /// Whether the handler is currently enabled.
    pub enabled: bool,
}

struct Registration {
    id: RegistrationId,
    kind: EventKind,
    priority: Priority,
    prefilter: Prefilter,
    filter: CompiledFilter,
    handler: Arc<dyn Handler>,
    enabled: AtomicBool,
}

impl Registration {
    fn info(&self) -> RegistrationInfo {
        RegistrationInfo {
            id: self.id,
            kind: self.kind,
            priority: self.priority,
            prefilter: self.prefilter.clone(),
            enabled: self.enabled.load(Ordering::SeqCst),
        }
    }
}

#[derive(Default)]
struct Table {
    by_kind: HashMap<EventKind, Vec<Arc<Registration>>>,
    index: HashMap<RegistrationId, EventKind>,
}

struct Inner {
    table: Mutex<Table>,
    next_id: AtomicU64,
}

/// The event dispatcher. Cheap to clone; clones share one registration table.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registrations", &self.len())
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(Table::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler.
    ///
    /// Handlers of equal priority run in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefilter names a key the kind does not accept
    /// or carries a value that doesn't compile.
    pub fn register<H: Handler>(
        &self,
        kind: EventKind,
        priority: Priority,
        prefilter: Prefilter,
        handler: H,
    ) -> DispatchResult<RegistrationId> {
        let filter = CompiledFilter::compile(kind, &prefilter)?;
        let id = RegistrationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Arc::new(Registration {
            id,
            kind,
            priority,
            prefilter,
            filter,
            handler: Arc::new(handler),
            enabled: AtomicBool::new(true),
        });

        let mut table = self.table();
        let list = table.by_kind.entry(kind).or_default();
        let position = list
            .iter()
            .position(|r| r.priority < priority)
            .unwrap_or(list.len());
        list.insert(position, registration);
        table.index.insert(id, kind);
        drop(table);

        debug!(registration = %id, event_type = %kind, priority = priority.0, "Handler registered");
        Ok(id)
    }

    /// Register a handler that receives the typed payload directly.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn on<T, F, Fut>(
        &self,
        priority: Priority,
        prefilter: Prefilter,
        handler: F,
    ) -> DispatchResult<RegistrationId>
    where
        T: EventPayload,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(T::KIND, priority, prefilter, move |event: Arc<Event>| {
            let fut = T::from_event(&event).cloned().map(&handler);
            async move {
                match fut {
                    Some(fut) => fut.await,
                    None => Ok(Outcome::NONE),
                }
            }
        })
    }

    /// Remove a registration. Unknown ids are ignored.
    ///
    /// Returns `true` if something was removed.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut table = self.table();
        let Some(kind) = table.index.remove(&id) else {
            return false;
        };
        if let Some(list) = table.by_kind.get_mut(&kind) {
            list.retain(|r| r.id != id);
            if list.is_empty() {
                table.by_kind.remove(&kind);
            }
        }
        drop(table);
        debug!(registration = %id, event_type = %kind, "Handler unregistered");
        true
    }

    /// Enable or disable a registration without removing it.
    ///
    /// Returns `false` if the id is unknown.
    pub fn set_enabled(&self, id: RegistrationId, enabled: bool) -> bool {
        let table = self.table();
        let Some(kind) = table.index.get(&id) else {
            return false;
        };
        let found = table
            .by_kind
            .get(kind)
            .and_then(|list| list.iter().find(|r| r.id == id));
        match found {
            Some(registration) => {
                registration.enabled.store(enabled, Ordering::SeqCst);
                true
            },
            None => false,
        }
    }

    /// Whether an id is currently registered.
    #[must_use]
    pub fn is_registered(&self, id: RegistrationId) -> bool {
        self.table().index.contains_key(&id)
    }

    /// Registrations for a kind, in dispatch order.
    #[must_use]
    pub fn registrations(&self, kind: EventKind) -> Vec<RegistrationInfo> {
        self.table()
            .by_kind
            .get(&kind)
            .map(|list| list.iter().map(|r| r.info()).collect())
            .unwrap_or_default()
    }

    /// Total number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table().index.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration.
    pub fn clear(&self) {
        let mut table = self.table();
        table.by_kind.clear();
        table.index.clear();
        drop(table);
        debug!("All handlers cleared");
    }

    fn snapshot(&self, kind: EventKind) -> Vec<Arc<Registration>> {
        self.table().by_kind.get(&kind).cloned().unwrap_or_default()
    }

    /// Deliver an event to its handlers.
    ///
    /// Resolves to `true` if at least one handler ran without error.
    pub fn dispatch(&self, event: impl Into<Event>) -> BoxFuture<'static, bool> {
        let this = self.clone();
        let event = Arc::new(event.into());
        Box::pin(async move { this.run(event).await })
    }

    async fn run(self, event: Arc<Event>) -> bool {
        let kind = event.kind();
        let snapshot = self.snapshot(kind);
        if snapshot.is_empty() {
            trace!(event_type = %kind, "No handlers");
            return false;
        }

        let mut handled = false;
        for registration in snapshot {
            // Removed or disabled by an earlier handler in this same dispatch.
            if !self.is_registered(registration.id)
                || !registration.enabled.load(Ordering::SeqCst)
            {
                continue;
            }
            if !registration.filter.matches(&event) {
                continue;
            }

            trace!(registration = %registration.id, event_type = %kind, "Calling handler");
            let result = AssertUnwindSafe(registration.handler.call(Arc::clone(&event)))
                .catch_unwind()
                .await;

            let failure = match result {
                Ok(Ok(outcome)) => {
                    handled = true;
                    if outcome.contains(Outcome::UNREGISTER) {
                        self.unregister(registration.id);
                    }
                    if outcome.contains(Outcome::EAT) {
                        trace!(registration = %registration.id, event_type = %kind, "Event eaten");
                        break;
                    }
                    continue;
                },
                Ok(Err(err)) => (format!("{err:#}"), err.to_string()),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    (format!("panicked: {message}"), format!("panicked: {message}"))
                },
            };
            self.report_failure(kind, registration.id, failure).await;
        }
        handled
    }

    async fn report_failure(
        &self,
        kind: EventKind,
        id: RegistrationId,
        (detail, summary): (String, String),
    ) {
        error!(event_type = %kind, registration = %id, error = %detail, "Event handler failed");
        // A failing console handler must not feed itself.
        if kind == EventKind::Console {
            return;
        }
        let notice = Console::new(
            "overseer",
            "error",
            format!("handler for {kind} failed: {summary}"),
        )
        .with_level("ERROR");
        self.dispatch(notice).await;
    }

    /// Dispatch `event` once after `delay`.
    pub fn dispatch_delayed(&self, event: impl Into<Event>, delay: Duration) -> TaskHandle {
        let this = self.clone();
        let event = event.into();
        scheduler::schedule_once(delay, move || async move {
            this.dispatch(event).await;
        })
    }

    /// Dispatch a copy of `event` every `interval`.
    pub fn dispatch_repeating(
        &self,
        event: impl Into<Event>,
        interval: Duration,
        run_immediately: bool,
    ) -> TaskHandle {
        let this = self.clone();
        let event = event.into();
        scheduler::schedule_repeating(interval, run_immediately, move || {
            let dispatch = this.dispatch(event.clone());
            async move {
                dispatch.await;
            }
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
