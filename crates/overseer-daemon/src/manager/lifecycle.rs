//! Stopping the server and tearing the manager down.

use std::sync::PoisonError;
use std::sync::atomic::Ordering;

use overseer_events::ServerStop;
use tracing::info;

use super::Manager;

impl Manager {
    /// Resolves once the server has stopped for good: a requested stop
    /// without respawn completed, or it crashed and nothing restarted it.
    pub async fn wait_terminated(&self) {
        self.inner.supervisor.wait_terminated().await;
    }

    /// Ask the server to stop gracefully.
    pub async fn request_stop(&self, reason: impl Into<String>) {
        self.inner
            .dispatcher
            .dispatch(ServerStop::new(reason))
            .await;
    }

    /// Stop the server if it still runs, then unload every plugin and close
    /// the attach socket. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.inner.supervisor.state().is_live() {
            info!("Stopping server before shutdown");
            self.request_stop("daemon shutting down").await;
        }
        self.wait_terminated().await;

        self.inner.plugins.unload_all().await;
        info!("Plugins shut down");

        self.inner.attach.stop();

        let ids = std::mem::take(
            &mut *self
                .inner
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for id in ids {
            self.inner.dispatcher.unregister(id);
        }
        self.inner.supervisor.uninstall();
        self.inner.router.uninstall();
        info!(instance = %self.inner.config.server.name, "Daemon stopped");
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}
