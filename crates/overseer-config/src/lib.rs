#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Configuration for the overseer supervisor.
//!
//! One TOML file describes one supervised server instance:
//!
//! ```toml
//! [server]
//! name = "survival"
//! jar = "server.jar"
//! java_flags = ["-Xmx4G"]
//! stop_timeout_secs = 60
//!
//! [attach]
//! scrollback = 500
//!
//! [plugins.alert]
//! interval = "10m"
//! messages = ["Remember to vote!", "Backups run nightly"]
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! let config = overseer_config::load(None).unwrap();
//! println!("Supervising {}", config.server.name);
//! ```
//!
//! # Design
//!
//! This crate has no dependencies on other internal overseer crates.
//! Conversion into logging, routing and plugin types happens in the daemon.

/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_FILE_NAME, load, load_file, parse, search_paths};
pub use types::*;
