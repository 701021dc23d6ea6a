//! The manager: one supervised server instance and everything around it.
//!
//! # Handler ownership
//!
//! Every handler the manager registers holds a weak reference to it, so the
//! dispatcher never keeps a shut down manager alive. Locks are never held
//! across an await.

mod commands;
mod console;
mod lifecycle;
mod startup;

pub use startup::ManagerOptions;

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use overseer_attach::AttachServer;
use overseer_config::Config;
use overseer_events::{
    Console, ConsoleLineRouter, DispatchResult, Dispatcher, EventPayload, HandlerResult, Outcome,
    Prefilter, Priority, RegistrationId,
};
use overseer_plugins::PluginManager;
use overseer_process::Supervisor;

struct Inner {
    config: Config,
    config_path: Option<PathBuf>,
    dispatcher: Dispatcher,
    router: ConsoleLineRouter,
    supervisor: Supervisor,
    plugins: PluginManager,
    attach: AttachServer,
    registrations: Mutex<Vec<RegistrationId>>,
    shut_down: AtomicBool,
}

/// A running daemon instance. Cheap to clone.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("instance", &self.inner.config.server.name)
            .field("state", &self.inner.supervisor.state())
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// The configuration the manager was started with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The shared event dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// The process supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    /// The plugin manager.
    #[must_use]
    pub fn plugins(&self) -> &PluginManager {
        &self.inner.plugins
    }

    /// The attach server.
    #[must_use]
    pub fn attach(&self) -> &AttachServer {
        &self.inner.attach
    }

    fn remember(&self, ids: impl IntoIterator<Item = RegistrationId>) {
        self.inner
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids);
    }

    /// Register a typed handler that runs against this manager while it is
    /// alive.
    fn handle<T, F, Fut>(
        &self,
        priority: Priority,
        prefilter: Prefilter,
        f: F,
    ) -> DispatchResult<RegistrationId>
    where
        T: EventPayload,
        F: Fn(Manager, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner
            .dispatcher
            .on::<T, _, _>(priority, prefilter, move |payload| {
                let pending = weak.upgrade().map(|inner| f(Manager { inner }, payload));
                async move {
                    match pending {
                        Some(pending) => pending.await,
                        None => Ok(Outcome::NONE),
                    }
                }
            })
    }

    /// Put a line on the console stream as the daemon.
    async fn say(&self, kind: &str, message: impl Into<String>) {
        self.inner
            .dispatcher
            .dispatch(Console::new("overseer", kind, message))
            .await;
    }
}
