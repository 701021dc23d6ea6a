//! Plugins that ship with the daemon.

mod alert;
mod monitor;
mod shutdown;

use overseer_plugins::PluginRegistry;
use tracing::error;

/// A registry holding every built-in plugin.
#[must_use]
pub fn builtin_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for descriptor in [
        alert::descriptor(),
        monitor::descriptor(),
        shutdown::descriptor(),
    ] {
        let name = descriptor.name().to_string();
        if let Err(err) = registry.register(descriptor) {
            error!(plugin = %name, error = %err, "Built-in plugin not registered");
        }
    }
    registry
}
