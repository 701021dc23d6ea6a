//! Overseer Events - typed events and the prioritized dispatcher.
//!
//! This crate provides:
//! - The closed set of [`Event`] types the supervisor exchanges
//! - A [`Dispatcher`] that delivers events to handlers in priority order
//! - Registration-time [`Prefilter`]s
//! - Delayed and repeating tasks built on tokio timers
//! - A [`ConsoleLineRouter`] turning server output into player events
//!
//! # Example
//!
//! ```rust
//! use overseer_events::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::new();
//!
//! dispatcher.on::<ServerStarted, _, _>(Priority::NORMAL, Prefilter::new(), |_started| async {
//!     HandlerResult::Ok(Outcome::NONE)
//! })?;
//!
//! assert!(dispatcher.dispatch(ServerStarted {}).await);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod dispatcher;
mod error;
mod event;
mod filter;
mod router;
mod scheduler;

pub use dispatcher::{
    Dispatcher, Handler, HandlerFuture, HandlerResult, Outcome, Priority, RegistrationId,
    RegistrationInfo,
};
pub use error::{DispatchError, DispatchResult};
pub use event::{
    Console, Event, EventKind, EventPayload, FatalError, Hook, PatternMatch, PlayerChat,
    PlayerDeath, PlayerJoin, PlayerQuit, ServerEvent, ServerInput, ServerOutput, ServerStart,
    ServerStarted, ServerStarting, ServerStop, ServerStopped, ServerStopping, StatPlayers,
    StatProcess, UserAttach, UserDetach, UserInput, clock_time,
};
pub use filter::{Prefilter, compile_regex};
pub use router::{ConsoleLineRouter, RouteId, RouteRule, RouteTarget};
pub use scheduler::{MIN_INTERVAL, TaskHandle, TaskId, schedule_once, schedule_repeating};
