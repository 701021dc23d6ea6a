//! Prelude module - commonly used types for convenient import.
//!
//! Use `use overseer_attach::prelude::*;` to import all essential types.

pub use crate::{
    AttachClient, AttachConfig, AttachError, AttachResult, AttachServer, ClientMessage,
    ServerMessage, find_instance, list_instances, socket_path,
};
