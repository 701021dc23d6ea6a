//! Overseer Process - supervision of the Minecraft server process.
//!
//! This crate provides:
//! - A [`Supervisor`] state machine driven entirely by dispatcher events
//! - Console line decoding into [`ServerOutput`](overseer_events::ServerOutput)
//! - A cancellable [`TimeoutGuard`] used as the stop failsafe
//! - The [`Launcher`] seam, with [`CommandLauncher`] for real processes
//! - Resource sampling through [`ProcessSampler`]
//!
//! The supervisor never blocks the dispatcher on the child: output is read
//! and stdin is written by dedicated tasks, and exits are observed by a
//! watcher task that reports back through events.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod console;
mod decoder;
mod error;
mod guard;
mod launcher;
mod sampler;
mod supervisor;

pub use console::{ConsoleRecord, UNKNOWN_LEVEL, decode_output};
pub use decoder::{LineDecoder, MAX_LINE_BYTES};
pub use error::{ProcessError, ProcessResult};
pub use guard::TimeoutGuard;
pub use launcher::{ChildControl, ChildHandle, CommandLauncher, ExitOutcome, LaunchSpec, Launcher};
pub use sampler::{ProcessSampler, ProcessStats, SysinfoSampler};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorState};
