//! Overseer Daemon - the composition root.
//!
//! This crate provides:
//! - A [`Manager`] that wires the dispatcher, supervisor, attach server and
//!   plugin manager for one server instance
//! - The built-in commands (`help`, `stop`, `restart`, `rehash`, ...)
//! - The crash restart policy and fatal error reporting
//! - The built-in plugins, available through [`builtin_registry`]
//! - Conversions from the config file to each component's settings
//!
//! # Example
//!
//! ```rust,ignore
//! use overseer_daemon::prelude::*;
//!
//! let config = overseer_config::load_file(&path)?;
//! let manager = Manager::start(config, ManagerOptions::default().with_config_path(&path)).await?;
//! manager.wait_terminated().await;
//! manager.shutdown().await;
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config_bridge;
pub mod prelude;

mod error;
mod manager;
mod plugins;

pub use error::{DaemonError, DaemonResult};
pub use manager::{Manager, ManagerOptions};
pub use plugins::builtin_registry;
