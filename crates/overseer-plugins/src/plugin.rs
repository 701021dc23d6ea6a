//! The plugin trait.

use async_trait::async_trait;

use crate::context::PluginContext;

/// A unit of behaviour bound to config properties and event registrations.
///
/// The manager constructs a fresh instance for every load, so a reload is a
/// state transfer between two instances: the old one's
/// [`save_state`](Plugin::save_state) output is handed to the new one's
/// [`load_state`](Plugin::load_state) after [`setup`](Plugin::setup).
///
/// Handlers outlive `&mut self`, so state they touch lives behind an
/// `Arc<Mutex<_>>` owned by the plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Register handlers, routes and tasks.
    ///
    /// An error here aborts the load and releases whatever was registered.
    async fn setup(&mut self, ctx: &PluginContext) -> anyhow::Result<()>;

    /// Export in-memory state before the instance is discarded.
    fn save_state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Import state exported by the previous instance.
    ///
    /// # Errors
    ///
    /// A failure is logged; the plugin keeps running with fresh state.
    fn load_state(&mut self, _state: serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// Final cleanup after all handles are released.
    async fn teardown(&mut self) {}
}
