//! Running plugins: load, unload, reload with state transfer, and rehash.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

use overseer_events::{Console, ConsoleLineRouter, Dispatcher};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::context::PluginContext;
use crate::error::{PluginError, PluginResult};
use crate::plugin::Plugin;
use crate::property::{Properties, Section};
use crate::registry::PluginRegistry;

struct LoadedPlugin {
    plugin: Box<dyn Plugin>,
    ctx: PluginContext,
}

/// What a rehash will do, computed from the old and new plugin sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RehashPlan {
    /// Running plugins that are no longer enabled.
    pub unload: Vec<String>,
    /// Running plugins whose section changed.
    pub reload: Vec<String>,
    /// Enabled plugins that are not running.
    pub load: Vec<String>,
    /// Running plugins with an identical section.
    pub unchanged: Vec<String>,
}

impl RehashPlan {
    /// Diff `old` against `new` for the plugins in `running`.
    #[must_use]
    pub fn compute(
        old: &BTreeMap<String, Section>,
        new: &BTreeMap<String, Section>,
        running: &BTreeSet<String>,
    ) -> Self {
        let mut plan = Self::default();
        for name in running {
            match new.get(name) {
                None => plan.unload.push(name.clone()),
                Some(section) if old.get(name) == Some(section) => {
                    plan.unchanged.push(name.clone());
                },
                Some(_) => plan.reload.push(name.clone()),
            }
        }
        for name in new.keys() {
            if !running.contains(name) {
                plan.load.push(name.clone());
            }
        }
        plan
    }

    /// Whether the plan changes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.unload.is_empty() && self.reload.is_empty() && self.load.is_empty()
    }
}

/// Loads plugins by name and keeps the running set.
///
/// Operations are serialized. A plugin's `setup` runs without any of the
/// manager's state locked, so it may dispatch freely, but it must not call
/// back into the manager.
pub struct PluginManager {
    registry: Arc<PluginRegistry>,
    dispatcher: Dispatcher,
    router: ConsoleLineRouter,
    sections: Mutex<BTreeMap<String, Section>>,
    running: Mutex<BTreeMap<String, LoadedPlugin>>,
    ops: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}

impl PluginManager {
    /// Create a manager with no plugin sections.
    #[must_use]
    pub fn new(
        registry: Arc<PluginRegistry>,
        dispatcher: Dispatcher,
        router: ConsoleLineRouter,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            router,
            sections: Mutex::new(BTreeMap::new()),
            running: Mutex::new(BTreeMap::new()),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    /// The registry plugins are built from.
    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Replace the enabled plugin sections without loading anything.
    pub fn set_sections(&self, sections: BTreeMap<String, Section>) {
        *self
            .sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = sections;
    }

    /// The current enabled plugin sections.
    #[must_use]
    pub fn sections(&self) -> BTreeMap<String, Section> {
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of running plugins, sorted.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Whether `name` is running.
    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Context of a running plugin.
    #[must_use]
    pub fn context(&self, name: &str) -> Option<PluginContext> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|loaded| loaded.ctx.clone())
    }

    /// Load `name` with its current section.
    ///
    /// # Errors
    ///
    /// Fails if the plugin is unknown, already running, has bad properties,
    /// or its `setup` fails. Nothing it registered stays registered.
    pub async fn load(&self, name: &str) -> PluginResult<()> {
        let _op = self.ops.lock().await;
        if self.is_running(name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }
        self.start(name, None).await
    }

    /// Unload `name`, returning the state it exported.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotLoaded`] if it is not running.
    pub async fn unload(&self, name: &str) -> PluginResult<Option<serde_json::Value>> {
        let _op = self.ops.lock().await;
        self.stop(name).await
    }

    /// Unload `name` if running, then load a fresh instance and hand it the
    /// previous instance's state.
    ///
    /// # Errors
    ///
    /// Fails like [`load`](Self::load). The old instance is gone either way.
    pub async fn reload(&self, name: &str) -> PluginResult<()> {
        let _op = self.ops.lock().await;
        self.restart(name).await
    }

    /// Load every enabled plugin in name order. Failures are logged and
    /// skipped.
    ///
    /// Returns the plugins that failed.
    pub async fn load_enabled(&self) -> Vec<(String, PluginError)> {
        let _op = self.ops.lock().await;
        let mut failures = Vec::new();
        for name in self.sections().into_keys() {
            if self.is_running(&name) {
                continue;
            }
            if let Err(err) = self.start(&name, None).await {
                failures.push((name, err));
            }
        }
        failures
    }

    /// Unload every running plugin, most recently named last first.
    pub async fn unload_all(&self) {
        let _op = self.ops.lock().await;
        let mut names = self.running();
        names.reverse();
        for name in names {
            if let Err(err) = self.stop(&name).await {
                warn!(plugin = %name, error = %err, "Plugin unload failed");
            }
        }
    }

    /// Apply new plugin sections, touching only plugins whose section
    /// changed.
    pub async fn rehash(&self, sections: BTreeMap<String, Section>) -> RehashPlan {
        let _op = self.ops.lock().await;
        let running: BTreeSet<String> = self.running().into_iter().collect();
        let old = std::mem::replace(
            &mut *self
                .sections
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            sections.clone(),
        );
        let plan = RehashPlan::compute(&old, &sections, &running);
        info!(
            unload = ?plan.unload,
            reload = ?plan.reload,
            load = ?plan.load,
            unchanged = plan.unchanged.len(),
            "Rehashing plugins"
        );

        for name in &plan.unload {
            if let Err(err) = self.stop(name).await {
                warn!(plugin = %name, error = %err, "Plugin unload failed");
            }
        }
        for name in &plan.reload {
            // failures were already reported
            let _ = self.restart(name).await;
        }
        for name in &plan.load {
            let _ = self.start(name, None).await;
        }
        plan
    }

    async fn restart(&self, name: &str) -> PluginResult<()> {
        let state = if self.is_running(name) {
            self.stop(name).await?
        } else {
            None
        };
        self.start(name, state).await
    }

    async fn start(&self, name: &str, state: Option<serde_json::Value>) -> PluginResult<()> {
        match self.try_start(name, state).await {
            Ok(()) => {
                info!(plugin = %name, "Plugin loaded");
                Ok(())
            },
            Err(err) => {
                error!(plugin = %name, error = %err, "Plugin failed to load");
                let notice = Console::new("overseer", "error", format!("{err}")).with_level("ERROR");
                self.dispatcher.dispatch(notice).await;
                Err(err)
            },
        }
    }

    async fn try_start(&self, name: &str, state: Option<serde_json::Value>) -> PluginResult<()> {
        let descriptor = self.registry.get(name)?;
        let section = self
            .sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default();
        let properties = Properties::bind(name, descriptor.properties(), &section)?;

        let ctx = PluginContext::new(
            name,
            self.dispatcher.clone(),
            self.router.clone(),
            properties,
        );
        let mut plugin = descriptor.build();
        if let Err(err) = plugin.setup(&ctx).await {
            ctx.release();
            return Err(PluginError::SetupFailed {
                plugin: name.to_string(),
                error: err,
            });
        }

        if let Some(state) = state {
            if let Err(err) = plugin.load_state(state) {
                warn!(plugin = %name, error = %format!("{err:#}"), "Plugin rejected its saved state");
            }
        }

        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), LoadedPlugin { plugin, ctx });
        Ok(())
    }

    async fn stop(&self, name: &str) -> PluginResult<Option<serde_json::Value>> {
        let loaded = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
        let LoadedPlugin { mut plugin, ctx } = loaded;

        let state = plugin.save_state();
        ctx.release();
        plugin.teardown().await;
        info!(plugin = %name, carried_state = state.is_some(), "Plugin unloaded");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{Property, PropertyType};
    use crate::registry::PluginDescriptor;
    use overseer_events::{
        EventKind, HandlerResult, Outcome, Prefilter, Priority, ServerInput, ServerStarted,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts `ServerStarted` events and carries the count across reloads.
    #[derive(Default)]
    struct Counter {
        seen: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Plugin for Counter {
        async fn setup(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
            let seen = Arc::clone(&self.seen);
            ctx.on::<ServerStarted, _, _>(Priority::NORMAL, Prefilter::new(), move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { HandlerResult::Ok(Outcome::NONE) }
            })?;
            Ok(())
        }

        fn save_state(&self) -> Option<serde_json::Value> {
            Some(serde_json::json!(self.seen.load(Ordering::SeqCst)))
        }

        fn load_state(&mut self, state: serde_json::Value) -> anyhow::Result<()> {
            let count: usize = serde_json::from_value(state)?;
            self.seen.store(count, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Registers a handler and a task, then fails.
    struct Broken;

    #[async_trait::async_trait]
    impl Plugin for Broken {
        async fn setup(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
            ctx.on::<ServerInput, _, _>(Priority::NORMAL, Prefilter::new(), |_| async {
                HandlerResult::Ok(Outcome::NONE)
            })?;
            ctx.repeating_task(Duration::from_secs(1), true, || async {})?;
            anyhow::bail!("database unreachable")
        }
    }

    /// Needs a `target` property.
    struct Needy;

    #[async_trait::async_trait]
    impl Plugin for Needy {
        async fn setup(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
            anyhow::ensure!(ctx.properties().string("target").is_some());
            Ok(())
        }
    }

    const NEEDY_PROPERTIES: &[Property] = &[Property::required("target", PropertyType::String)];

    fn manager() -> (PluginManager, Dispatcher) {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginDescriptor::new("counter", || Box::new(Counter::default())))
            .unwrap();
        registry
            .register(PluginDescriptor::new("broken", || Box::new(Broken)))
            .unwrap();
        registry
            .register(
                PluginDescriptor::new("needy", || Box::new(Needy))
                    .with_properties(NEEDY_PROPERTIES),
            )
            .unwrap();
        let dispatcher = Dispatcher::new();
        let router = ConsoleLineRouter::new(dispatcher.clone());
        (
            PluginManager::new(Arc::new(registry), dispatcher.clone(), router),
            dispatcher,
        )
    }

    fn section(pairs: &[(&str, &str)]) -> Section {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_load_and_unload() {
        let (manager, dispatcher) = manager();
        manager.load("counter").await.unwrap();
        assert!(manager.is_running("counter"));
        assert_eq!(dispatcher.registrations(EventKind::ServerStarted).len(), 1);

        assert!(matches!(
            manager.load("counter").await,
            Err(PluginError::AlreadyLoaded(_))
        ));

        let state = manager.unload("counter").await.unwrap();
        assert_eq!(state, Some(serde_json::json!(0)));
        assert!(dispatcher.registrations(EventKind::ServerStarted).is_empty());
        assert!(matches!(
            manager.unload("counter").await,
            Err(PluginError::NotLoaded(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_carries_state() {
        let (manager, dispatcher) = manager();
        manager.load("counter").await.unwrap();
        dispatcher.dispatch(ServerStarted {}).await;
        dispatcher.dispatch(ServerStarted {}).await;

        manager.reload("counter").await.unwrap();
        assert_eq!(dispatcher.registrations(EventKind::ServerStarted).len(), 1);

        dispatcher.dispatch(ServerStarted {}).await;
        let state = manager.unload("counter").await.unwrap();
        assert_eq!(state, Some(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn test_reload_of_stopped_plugin_starts_fresh() {
        let (manager, _dispatcher) = manager();
        manager.reload("counter").await.unwrap();
        assert_eq!(
            manager.unload("counter").await.unwrap(),
            Some(serde_json::json!(0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_setup_releases_everything() {
        let (manager, dispatcher) = manager();
        let err = manager.load("broken").await.unwrap_err();
        assert!(matches!(err, PluginError::SetupFailed { .. }));
        assert!(err.to_string().contains("database unreachable"));
        assert!(!manager.is_running("broken"));
        assert!(dispatcher.registrations(EventKind::ServerInput).is_empty());
    }

    #[tokio::test]
    async fn test_missing_property_fails_load() {
        let (manager, _dispatcher) = manager();
        assert!(matches!(
            manager.load("needy").await,
            Err(PluginError::MissingProperty { .. })
        ));

        manager.set_sections(BTreeMap::from([(
            "needy".to_string(),
            section(&[("target", "x")]),
        )]));
        manager.load("needy").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_plugin() {
        let (manager, _dispatcher) = manager();
        assert!(matches!(
            manager.load("ghost").await,
            Err(PluginError::UnknownPlugin(_))
        ));
    }

    #[tokio::test]
    async fn test_load_enabled_skips_failures() {
        let (manager, _dispatcher) = manager();
        manager.set_sections(BTreeMap::from([
            ("broken".to_string(), Section::new()),
            ("counter".to_string(), Section::new()),
        ]));
        let failures = manager.load_enabled().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken");
        assert_eq!(manager.running(), vec!["counter".to_string()]);
    }

    #[tokio::test]
    async fn test_unload_all() {
        let (manager, dispatcher) = manager();
        manager.set_sections(BTreeMap::from([
            ("counter".to_string(), Section::new()),
            ("needy".to_string(), section(&[("target", "x")])),
        ]));
        manager.load_enabled().await;
        assert_eq!(manager.running().len(), 2);

        manager.unload_all().await;
        assert!(manager.running().is_empty());
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_rehash_plan() {
        let old = BTreeMap::from([
            ("a".to_string(), section(&[("k", "1")])),
            ("b".to_string(), section(&[("k", "1")])),
            ("c".to_string(), Section::new()),
        ]);
        let new = BTreeMap::from([
            ("a".to_string(), section(&[("k", "1")])),
            ("b".to_string(), section(&[("k", "2")])),
            ("d".to_string(), Section::new()),
        ]);
        let running = BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()]);

        let plan = RehashPlan::compute(&old, &new, &running);
        assert_eq!(plan.unchanged, vec!["a"]);
        assert_eq!(plan.reload, vec!["b"]);
        assert_eq!(plan.unload, vec!["c"]);
        assert_eq!(plan.load, vec!["d"]);
        assert!(!plan.is_noop());
    }

    #[tokio::test]
    async fn test_rehash_keeps_unchanged_instance() {
        let (manager, dispatcher) = manager();
        manager.set_sections(BTreeMap::from([
            ("counter".to_string(), Section::new()),
            ("needy".to_string(), section(&[("target", "x")])),
        ]));
        manager.load_enabled().await;
        dispatcher.dispatch(ServerStarted {}).await;

        let plan = manager
            .rehash(BTreeMap::from([(
                "counter".to_string(),
                Section::new(),
            )]))
            .await;

        assert_eq!(plan.unchanged, vec!["counter"]);
        assert_eq!(plan.unload, vec!["needy"]);
        assert_eq!(manager.running(), vec!["counter".to_string()]);
        // same instance, counter untouched by a reload
        assert_eq!(
            manager.unload("counter").await.unwrap(),
            Some(serde_json::json!(1))
        );
    }
}
