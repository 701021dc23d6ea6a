//! Prelude module - commonly used types for convenient import.
//!
//! Use `use overseer_plugins::prelude::*;` to import all essential types.

pub use crate::{
    Plugin, PluginContext, PluginDescriptor, PluginError, PluginManager, PluginRegistry,
    PluginResult, Properties, Property, PropertyType,
};

pub use overseer_events::prelude::*;
