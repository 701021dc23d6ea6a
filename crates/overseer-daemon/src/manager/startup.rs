//! Manager startup: validation, component construction and wiring.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use overseer_attach::AttachServer;
use overseer_config::Config;
use overseer_events::{ConsoleLineRouter, Dispatcher, ServerStart};
use overseer_plugins::{PluginManager, PluginRegistry};
use overseer_process::{CommandLauncher, Launcher, ProcessSampler, Supervisor, SysinfoSampler};
use tracing::{info, warn};

use super::{Inner, Manager};
use crate::config_bridge::{route_rules, to_attach_config, to_supervisor_config};
use crate::error::{DaemonError, DaemonResult};
use crate::plugins::builtin_registry;

/// Collaborators the manager is built with.
pub struct ManagerOptions {
    /// File the config was loaded from, re-read by `rehash`.
    pub config_path: Option<PathBuf>,
    /// Spawns the server process.
    pub launcher: Arc<dyn Launcher>,
    /// Samples the server's resource usage.
    pub sampler: Arc<dyn ProcessSampler>,
    /// Plugins available by name.
    pub registry: PluginRegistry,
}

impl std::fmt::Debug for ManagerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerOptions")
            .field("config_path", &self.config_path)
            .field("plugins", &self.registry.names())
            .finish_non_exhaustive()
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            launcher: Arc::new(CommandLauncher),
            sampler: Arc::new(SysinfoSampler::new()),
            registry: builtin_registry(),
        }
    }
}

impl ManagerOptions {
    /// Remember where the config came from.
    #[must_use]
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Replace the process launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replace the stats sampler.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn ProcessSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Replace the plugin registry.
    #[must_use]
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }
}

impl Manager {
    /// Build every component, bind the attach socket, load the enabled
    /// plugins and start the server.
    ///
    /// # Errors
    ///
    /// Fails before anything is spawned if the jar is missing, the attach
    /// socket cannot be bound, or a configured pattern is rejected. Plugin
    /// load failures are logged and do not fail startup.
    pub async fn start(config: Config, options: ManagerOptions) -> DaemonResult<Self> {
        let jar = config.jar_path();
        if !jar.is_file() {
            return Err(DaemonError::JarNotFound(jar));
        }

        let dispatcher = Dispatcher::new();

        let router = ConsoleLineRouter::new(dispatcher.clone());
        router.install()?;
        for rule in route_rules(&config.patterns) {
            router.add_rule(rule)?;
        }

        let supervisor = Supervisor::new(
            to_supervisor_config(&config),
            dispatcher.clone(),
            options.launcher,
            options.sampler,
        )?;

        let attach = AttachServer::new(to_attach_config(&config), dispatcher.clone());
        attach.start().await?;

        let plugins = PluginManager::new(
            Arc::new(options.registry),
            dispatcher.clone(),
            router.clone(),
        );
        plugins.set_sections(config.plugin_sections());

        let manager = Self {
            inner: Arc::new(Inner {
                config,
                config_path: options.config_path,
                dispatcher,
                router,
                supervisor,
                plugins,
                attach,
                registrations: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        };
        if let Err(err) = manager.install() {
            manager.inner.attach.stop();
            return Err(err.into());
        }

        for (name, err) in manager.inner.plugins.load_enabled().await {
            warn!(plugin = %name, error = %err, "Continuing without plugin");
        }

        info!(
            instance = %manager.inner.config.server.name,
            socket = %manager.inner.attach.socket_path().display(),
            plugins = ?manager.inner.plugins.running(),
            "Manager started"
        );
        manager.inner.dispatcher.dispatch(ServerStart {}).await;
        Ok(manager)
    }

    fn install(&self) -> overseer_events::DispatchResult<()> {
        self.inner.supervisor.install()?;
        self.inner.attach.install()?;
        let bridge = self.install_console_bridge()?;
        self.remember(bridge);
        let commands = self.install_commands()?;
        self.remember(commands);
        Ok(())
    }
}
