//! Prelude module - commonly used types for convenient import.
//!
//! Use `use overseer_process::prelude::*;` to import all essential types.

pub use crate::{
    CommandLauncher, LaunchSpec, Launcher, ProcessError, ProcessResult, Supervisor,
    SupervisorConfig, SupervisorState, SysinfoSampler,
};
