//! Plugin error types.

use overseer_events::DispatchError;

/// Errors from plugin operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// No plugin of this name is registered.
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    /// A plugin with this name is already registered.
    #[error("plugin already registered: {0}")]
    AlreadyRegistered(String),

    /// The plugin is already running.
    #[error("plugin already loaded: {0}")]
    AlreadyLoaded(String),

    /// The plugin is not running.
    #[error("plugin not loaded: {0}")]
    NotLoaded(String),

    /// The plugin name is malformed.
    #[error("invalid plugin name: {0}")]
    InvalidName(String),

    /// A required property is absent from the plugin's section.
    #[error("plugin {plugin}: missing required property '{property}'")]
    MissingProperty {
        /// Plugin name.
        plugin: String,
        /// Property name.
        property: String,
    },

    /// A property value could not be coerced to its declared type.
    #[error("plugin {plugin}: invalid value '{value}' for property '{property}': {message}")]
    InvalidProperty {
        /// Plugin name.
        plugin: String,
        /// Property name.
        property: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        message: String,
    },

    /// `setup()` returned an error.
    #[error("plugin {plugin} failed to set up: {error:#}")]
    SetupFailed {
        /// Plugin name.
        plugin: String,
        /// The setup error.
        error: anyhow::Error,
    },

    /// The plugin's context was released by an unload.
    #[error("plugin {0} has been unloaded")]
    Released(String),

    /// A registration was rejected by the dispatcher.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
