//! Overseer Attach - the Unix socket attach protocol.
//!
//! This crate provides:
//! - Newline-delimited JSON [`ClientMessage`]s and [`ServerMessage`]s
//! - An [`AttachServer`] that keeps a scrollback, broadcasts console lines
//!   to attached users and turns their input into events
//! - An [`AttachClient`] for frontends
//! - Socket path helpers for finding running instances
//!
//! # Example
//!
//! ```rust,ignore
//! use overseer_attach::prelude::*;
//!
//! let mut client = AttachClient::connect(&find_instance(dir, "survival")?).await?;
//! client.attach("alice").await?;
//! while let Some(message) = client.recv().await? {
//!     if let ServerMessage::Console { line } = message {
//!         println!("{}", line.render());
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

mod client;
mod error;
mod paths;
mod protocol;
mod scrollback;
mod server;

pub use client::{AttachClient, ClientReader, ClientWriter};
pub use error::{AttachError, AttachResult};
pub use paths::{SOCKET_EXTENSION, find_instance, list_instances, socket_path};
pub use protocol::{ClientMessage, MAX_LINE, ServerMessage, decode_client, decode_server, encode};
pub use scrollback::Scrollback;
pub use server::{AttachConfig, AttachServer, SessionId};
