//! Prelude module - commonly used types for convenient import.
//!
//! Use `use overseer_events::prelude::*;` to import all essential types.

// Dispatch
pub use crate::{
    Dispatcher, HandlerResult, Outcome, Prefilter, Priority, RegistrationId, TaskHandle,
};

// Errors
pub use crate::{DispatchError, DispatchResult};

// Events
pub use crate::{
    Console, Event, EventKind, EventPayload, FatalError, Hook, PatternMatch, PlayerChat,
    PlayerDeath, PlayerJoin, PlayerQuit, ServerEvent, ServerInput, ServerOutput, ServerStart,
    ServerStarted, ServerStarting, ServerStop, ServerStopped, ServerStopping, StatPlayers,
    StatProcess, UserAttach, UserDetach, UserInput,
};

// Routing
pub use crate::{ConsoleLineRouter, RouteRule, RouteTarget};
