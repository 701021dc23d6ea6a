//! Name to factory mapping for plugins.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::plugin::Plugin;
use crate::property::Property;

type Factory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// How to build one plugin.
#[derive(Clone)]
pub struct PluginDescriptor {
    name: String,
    description: String,
    properties: Vec<Property>,
    factory: Factory,
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl PluginDescriptor {
    /// Describe a plugin built by `factory`.
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            properties: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    /// Declare the plugin's properties.
    #[must_use]
    pub fn with_properties(mut self, properties: &[Property]) -> Self {
        self.properties = properties.to_vec();
        self
    }

    /// Set a one-line description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared properties.
    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Build a fresh instance.
    #[must_use]
    pub fn build(&self) -> Box<dyn Plugin> {
        (self.factory)()
    }
}

/// Check a plugin name: non-empty, lowercase alphanumerics and hyphens,
/// no leading or trailing hyphen.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// The set of plugins that can be loaded by name.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, PluginDescriptor>,
}

impl PluginRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidName`] or
    /// [`PluginError::AlreadyRegistered`].
    pub fn register(&mut self, descriptor: PluginDescriptor) -> PluginResult<()> {
        if !is_valid_name(&descriptor.name) {
            return Err(PluginError::InvalidName(descriptor.name));
        }
        if self.plugins.contains_key(&descriptor.name) {
            return Err(PluginError::AlreadyRegistered(descriptor.name));
        }
        debug!(plugin = %descriptor.name, "Registered plugin factory");
        self.plugins.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Look up a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::UnknownPlugin`].
    pub fn get(&self, name: &str) -> PluginResult<&PluginDescriptor> {
        self.plugins
            .get(name)
            .ok_or_else(|| PluginError::UnknownPlugin(name.to_string()))
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
