//! Per-plugin handle bookkeeping.
//!
//! Everything a plugin registers goes through its [`PluginContext`], which
//! remembers the handle so the manager can release all of it in one sweep
//! when the plugin is unloaded or reloaded.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use overseer_events::{
    Console, ConsoleLineRouter, Dispatcher, Event, EventKind, EventPayload, Handler,
    HandlerResult, Hook, Prefilter, Priority, RegistrationId, RouteId, RouteRule, ServerInput,
    TaskHandle, TaskId, schedule_once, schedule_repeating,
};
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::property::Properties;

#[derive(Default)]
struct Handles {
    released: bool,
    registrations: Vec<RegistrationId>,
    tasks: Vec<TaskHandle>,
    routes: Vec<RouteId>,
}

struct ContextInner {
    name: String,
    dispatcher: Dispatcher,
    router: ConsoleLineRouter,
    properties: Properties,
    handles: Mutex<Handles>,
}

/// A plugin's view of the supervisor. Cheap to clone.
///
/// Handlers that need to register more things later should capture a clone.
/// Once the plugin is unloaded every registering method fails with
/// [`PluginError::Released`].
#[derive(Clone)]
pub struct PluginContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handles = self.handles();
        f.debug_struct("PluginContext")
            .field("name", &self.inner.name)
            .field("registrations", &handles.registrations.len())
            .field("tasks", &handles.tasks.len())
            .field("routes", &handles.routes.len())
            .field("released", &handles.released)
            .finish()
    }
}

impl PluginContext {
    /// Create a context for `name`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        dispatcher: Dispatcher,
        router: ConsoleLineRouter,
        properties: Properties,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name: name.into(),
                dispatcher,
                router,
                properties,
                handles: Mutex::new(Handles::default()),
            }),
        }
    }

    fn handles(&self) -> MutexGuard<'_, Handles> {
        self.inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the live handle set, failing if the context was released.
    fn track<T>(&self, f: impl FnOnce(&mut Handles) -> T) -> PluginResult<T> {
        let mut handles = self.handles();
        if handles.released {
            return Err(PluginError::Released(self.inner.name.clone()));
        }
        Ok(f(&mut handles))
    }

    fn ensure_live(&self) -> PluginResult<()> {
        self.track(|_| ())
    }

    /// The owning plugin's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The plugin's bound properties.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.inner.properties
    }

    /// The shared dispatcher. Registrations made on it directly are not
    /// tracked.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Register a raw handler.
    ///
    /// # Errors
    ///
    /// Fails if the prefilter is rejected or the context was released.
    pub fn register<H: Handler>(
        &self,
        kind: EventKind,
        priority: Priority,
        prefilter: Prefilter,
        handler: H,
    ) -> PluginResult<RegistrationId> {
        self.ensure_live()?;
        let id = self
            .inner
            .dispatcher
            .register(kind, priority, prefilter, handler)?;
        self.remember_registration(id)
    }

    /// Register a typed handler.
    ///
    /// # Errors
    ///
    /// Fails if the prefilter is rejected or the context was released.
    pub fn on<T, F, Fut>(
        &self,
        priority: Priority,
        prefilter: Prefilter,
        handler: F,
    ) -> PluginResult<RegistrationId>
    where
        T: EventPayload,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.ensure_live()?;
        let id = self
            .inner
            .dispatcher
            .on::<T, F, Fut>(priority, prefilter, handler)?;
        self.remember_registration(id)
    }

    /// Register a public command reachable as `<prefix>name` from attached
    /// clients.
    ///
    /// # Errors
    ///
    /// Fails if the context was released.
    pub fn command<F, Fut>(&self, name: &str, doc: &str, handler: F) -> PluginResult<RegistrationId>
    where
        F: Fn(Hook) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let prefilter = Prefilter::name(name).arg("public", "true").arg("doc", doc);
        self.on::<Hook, F, Fut>(Priority::NORMAL, prefilter, handler)
    }

    fn remember_registration(&self, id: RegistrationId) -> PluginResult<RegistrationId> {
        let kept = self.track(|h| h.registrations.push(id));
        if kept.is_err() {
            // released while registering
            self.inner.dispatcher.unregister(id);
        }
        kept.map(|()| id)
    }

    /// Remove one of this plugin's registrations.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        self.handles().registrations.retain(|r| *r != id);
        self.inner.dispatcher.unregister(id)
    }

    fn remember_task(&self, task: TaskHandle) -> PluginResult<TaskId> {
        let id = task.id();
        let mut handles = self.handles();
        if handles.released {
            task.cancel();
            return Err(PluginError::Released(self.inner.name.clone()));
        }
        handles.tasks.retain(|t| !t.is_finished());
        handles.tasks.push(task);
        Ok(id)
    }

    /// Run `task` once after `delay`.
    ///
    /// # Errors
    ///
    /// Fails if the context was released.
    pub fn delayed_task<F, Fut>(&self, delay: Duration, task: F) -> PluginResult<TaskId>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_live()?;
        self.remember_task(schedule_once(delay, task))
    }

    /// Run `task` every `interval`.
    ///
    /// # Errors
    ///
    /// Fails if the context was released.
    pub fn repeating_task<F, Fut>(
        &self,
        interval: Duration,
        run_immediately: bool,
        task: F,
    ) -> PluginResult<TaskId>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_live()?;
        self.remember_task(schedule_repeating(interval, run_immediately, task))
    }

    /// Dispatch `event` after `delay`.
    ///
    /// # Errors
    ///
    /// Fails if the context was released.
    pub fn dispatch_delayed(&self, event: impl Into<Event>, delay: Duration) -> PluginResult<TaskId> {
        self.ensure_live()?;
        self.remember_task(self.inner.dispatcher.dispatch_delayed(event, delay))
    }

    /// Dispatch `event` every `interval`.
    ///
    /// # Errors
    ///
    /// Fails if the context was released.
    pub fn dispatch_repeating(
        &self,
        event: impl Into<Event>,
        interval: Duration,
        run_immediately: bool,
    ) -> PluginResult<TaskId> {
        self.ensure_live()?;
        self.remember_task(
            self.inner
                .dispatcher
                .dispatch_repeating(event, interval, run_immediately),
        )
    }

    /// Cancel one task. Returns `false` for unknown ids.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let mut handles = self.handles();
        let Some(index) = handles.tasks.iter().position(|t| t.id() == id) else {
            return false;
        };
        handles.tasks.swap_remove(index).cancel();
        true
    }

    /// Number of tasks that have not finished.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.handles()
            .tasks
            .iter()
            .filter(|t| !t.is_finished() && !t.is_cancelled())
            .count()
    }

    /// Cancel every task this plugin created.
    pub fn stop_tasks(&self) {
        let tasks = std::mem::take(&mut self.handles().tasks);
        if !tasks.is_empty() {
            debug!(plugin = %self.inner.name, count = tasks.len(), "Cancelling plugin tasks");
        }
        for task in tasks {
            task.cancel();
        }
    }

    /// Add a console route owned by this plugin.
    ///
    /// # Errors
    ///
    /// Fails if the rule is invalid or the context was released.
    pub fn add_route(&self, rule: RouteRule) -> PluginResult<RouteId> {
        self.ensure_live()?;
        let id = self.inner.router.add_rule(rule)?;
        let kept = self.track(|h| h.routes.push(id));
        if kept.is_err() {
            self.inner.router.remove_rule(id);
        }
        kept.map(|()| id)
    }

    /// Write a line to the server's stdin.
    pub async fn send(&self, line: impl Into<String>) {
        self.inner.dispatcher.dispatch(ServerInput::new(line)).await;
    }

    /// Print a line on the console stream, attributed to this plugin.
    pub async fn console(&self, message: impl Into<String>) {
        let line = Console::new(self.inner.name.clone(), "plugin", message);
        self.inner.dispatcher.dispatch(line).await;
    }

    /// Dispatch any event.
    pub async fn dispatch(&self, event: impl Into<Event>) -> bool {
        self.inner.dispatcher.dispatch(event).await
    }

    /// Release every registration, task and route. Idempotent.
    pub(crate) fn release(&self) {
        let handles = {
            let mut guard = self.handles();
            let taken = std::mem::take(&mut *guard);
            guard.released = true;
            taken
        };
        debug!(
            plugin = %self.inner.name,
            registrations = handles.registrations.len(),
            tasks = handles.tasks.len(),
            routes = handles.routes.len(),
            "Releasing plugin handles"
        );
        for task in handles.tasks {
            task.cancel();
        }
        for id in handles.registrations {
            self.inner.dispatcher.unregister(id);
        }
        for id in handles.routes {
            self.inner.router.remove_rule(id);
        }
    }

    /// Whether the plugin was unloaded.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.handles().released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overseer_events::{Outcome, PatternMatch, RouteTarget, ServerOutput};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> (PluginContext, Dispatcher, ConsoleLineRouter) {
        let dispatcher = Dispatcher::new();
        let router = ConsoleLineRouter::new(dispatcher.clone());
        let ctx = PluginContext::new(
            "test",
            dispatcher.clone(),
            router.clone(),
            Properties::default(),
        );
        (ctx, dispatcher, router)
    }

    async fn noop(_hook: Hook) -> HandlerResult {
        Ok(Outcome::NONE)
    }

    #[tokio::test]
    async fn test_release_removes_registrations_and_routes() {
        let (ctx, dispatcher, router) = context();
        ctx.command("ping", "Reply with pong", noop).unwrap();
        ctx.add_route(RouteRule::new(
            RouteTarget::Pattern("lag".into()),
            "Can't keep up",
        ))
        .unwrap();
        assert_eq!(dispatcher.len(), 1);
        assert_eq!(router.list().len(), 1);

        ctx.release();
        assert!(ctx.is_released());
        assert!(dispatcher.is_empty());
        assert!(router.list().is_empty());
    }

    #[tokio::test]
    async fn test_registering_after_release_fails() {
        let (ctx, dispatcher, _router) = context();
        ctx.release();
        ctx.release();

        assert!(matches!(
            ctx.command("ping", "", noop),
            Err(PluginError::Released(_))
        ));
        assert!(matches!(
            ctx.delayed_task(Duration::from_secs(1), || async {}),
            Err(PluginError::Released(_))
        ));
        assert!(dispatcher.is_empty());
    }

    #[tokio::test]
    async fn test_command_is_public_with_doc() {
        let (ctx, dispatcher, _router) = context();
        ctx.command("ping", "Reply with pong", noop).unwrap();

        let info = &dispatcher.registrations(EventKind::Hook)[0];
        assert_eq!(info.prefilter.get("name"), Some("ping"));
        assert_eq!(info.prefilter.get("public"), Some("true"));
        assert_eq!(info.prefilter.get("doc"), Some("Reply with pong"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tasks_cancels_pending_work() {
        let (ctx, _dispatcher, _router) = context();
        let count = Arc::new(AtomicUsize::new(0));
        let tick = Arc::clone(&count);
        ctx.repeating_task(Duration::from_secs(1), false, move || {
            let tick = Arc::clone(&tick);
            async move {
                tick.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        let once = Arc::clone(&count);
        let delayed = ctx
            .delayed_task(Duration::from_secs(5), move || async move {
                once.fetch_add(100, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(ctx.active_tasks(), 2);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(ctx.cancel_task(delayed));
        assert!(!ctx.cancel_task(delayed));
        ctx.stop_tasks();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.active_tasks(), 0);
    }

    #[tokio::test]
    async fn test_routes_dispatch_pattern_matches() {
        let (ctx, dispatcher, router) = context();
        router.install().unwrap();
        ctx.add_route(RouteRule::new(
            RouteTarget::Pattern("lag".into()),
            r"Can't keep up! Is the server overloaded\? Running (?P<ms>\d+)ms",
        ))
        .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ctx.on::<PatternMatch, _, _>(Priority::NORMAL, Prefilter::name("lag"), move |m| {
            sink.lock().unwrap().push(m.captures.get("ms").cloned());
            async { HandlerResult::Ok(Outcome::NONE) }
        })
        .unwrap();

        dispatcher
            .dispatch(ServerOutput {
                line: String::new(),
                time: None,
                level: "WARN".into(),
                data: "Can't keep up! Is the server overloaded? Running 2500ms".into(),
            })
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![Some("2500".to_string())]);
    }
}
