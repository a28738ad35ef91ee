//! Event error types

use thiserror::Error;

/// Result type for event operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors from event field access
#[derive(Debug, Error)]
pub enum EventError {
    /// A `@timestamp` write carried a value that is not an RFC 3339 string
    #[error("invalid timestamp value: {0}")]
    InvalidTimestamp(String),

    /// A dotted path traversed a value that is not a map
    #[error("key '{key}' is not an object")]
    NotAnObject {
        /// The path segment that was not a map
        key: String,
    },

    /// The key does not exist
    #[error("key '{0}' not found")]
    KeyNotFound(String),
}
