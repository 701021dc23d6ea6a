//! CLI command implementations.

pub(crate) mod attach;
pub(crate) mod control;
pub(crate) mod list;
pub(crate) mod run;
pub(crate) mod start;
