//! Overseer Test - shared test utilities.
//!
//! This crate provides in-memory stand-ins and helpers used across the
//! overseer crates as a dev-dependency.
//!
//! # Usage
//!
//! ```rust,ignore
//! use overseer_test::prelude::*;
//!
//! #[tokio::test]
//! async fn test_server_boots() {
//!     let launcher = FakeLauncher::new().with_boot_lines([DONE_LINE]);
//!     // hand `launcher` to a supervisor, then:
//!     let server = launcher.next_server().await.unwrap();
//!     server.exit(0);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod launcher;
pub mod recorder;

pub use fixtures::*;
pub use launcher::*;
pub use recorder::*;
