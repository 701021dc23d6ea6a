//! Error types for event registration.

use thiserror::Error;

use crate::event::EventKind;

/// Errors raised when registering handlers or routes.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A prefilter key is not understood by this event kind.
    #[error("event {kind} does not accept prefilter key '{key}'")]
    UnknownFilterKey {
        /// The event kind being registered for.
        kind: EventKind,
        /// The offending key.
        key: String,
    },

    /// A prefilter value could not be interpreted.
    #[error("invalid value '{value}' for prefilter key '{key}': {message}")]
    InvalidFilterValue {
        /// The key.
        key: String,
        /// The value given.
        value: String,
        /// What was wrong with it.
        message: String,
    },

    /// A regular expression failed to compile.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The pattern text.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// A route pattern lacks a named group its target needs.
    #[error("pattern for {target} routes must capture '{capture}'")]
    MissingCapture {
        /// Route target name.
        target: String,
        /// Required capture group.
        capture: String,
    },
}

/// Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
