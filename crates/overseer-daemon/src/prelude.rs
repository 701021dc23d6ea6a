//! Prelude module - commonly used types for convenient import.
//!
//! Use `use overseer_daemon::prelude::*;` to import all essential types.

pub use crate::{DaemonError, DaemonResult, Manager, ManagerOptions, builtin_registry};
