//! Pipeline error types

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline or its queue is shutting down
    #[error("pipeline is shutting down")]
    Closed,

    /// A processor rejected an event with an error (distinct from an
    /// intentional drop)
    #[error("processor '{processor}' failed: {message}")]
    ProcessorFailed {
        /// Name of the failing processor
        processor: &'static str,
        /// Error detail
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Closed;
        assert!(err.to_string().contains("shutting down"));

        let err = PipelineError::ProcessorFailed {
            processor: "drop_fields",
            message: "bad pattern".into(),
        };
        assert!(err.to_string().contains("drop_fields"));
        assert!(err.to_string().contains("bad pattern"));
    }
}
