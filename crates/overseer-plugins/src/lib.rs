//! Overseer Plugins - the plugin framework.
//!
//! This crate provides:
//! - The [`Plugin`] trait with setup, teardown and state transfer hooks
//! - Declared, typed [`Property`] binding from flat config sections
//! - [`PluginContext`], which tracks every handle a plugin creates
//! - A [`PluginRegistry`] mapping names to factories
//! - A [`PluginManager`] for load, unload, reload and rehash
//!
//! # Example
//!
//! ```rust,ignore
//! use overseer_plugins::prelude::*;
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl Plugin for Greeter {
//!     async fn setup(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
//!         let console = ctx.clone();
//!         ctx.on::<PlayerJoin, _, _>(Priority::NORMAL, Prefilter::new(), move |join| {
//!             let console = console.clone();
//!             async move {
//!                 console.send(format!("say Welcome, {}!", join.username)).await;
//!                 HandlerResult::Ok(Outcome::NONE)
//!             }
//!         })?;
//!         Ok(())
//!     }
//! }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod manager;
mod plugin;
mod property;
mod registry;

pub use context::PluginContext;
pub use error::{PluginError, PluginResult};
pub use manager::{PluginManager, RehashPlan};
pub use plugin::Plugin;
pub use property::{Properties, Property, PropertyType, PropertyValue, Section, parse_duration};
pub use registry::{PluginDescriptor, PluginRegistry, is_valid_name};
