//! Queue error types

use std::io;
use thiserror::Error;

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors surfaced by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue is shutting down
    #[error("queue is closed")]
    Closed,

    /// Non-blocking publish refused: no capacity right now
    #[error("queue is full")]
    Full,

    /// Event could not be encoded for storage
    #[error("entry encoding failed: {0}")]
    Encode(String),

    /// Stored frame could not be decoded back into an event
    #[error("entry decoding failed: {0}")]
    Decode(String),

    /// Frame checksum mismatch while reading a segment
    #[error("checksum mismatch in segment {segment} at byte {offset}")]
    Checksum {
        /// Segment the corrupted frame was found in
        segment: u64,
        /// Byte offset of the frame within the segment file
        offset: u64,
    },

    /// Startup-only configuration failure
    #[error("invalid queue settings: {0}")]
    Settings(String),

    /// I/O failure
    #[error("queue I/O error: {0}")]
    Io(#[from] io::Error),
}
