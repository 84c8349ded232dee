// smartpixl-pipeline: Error types

use thiserror::Error;

/// Pipeline result type
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Pipeline error types
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Permanent database fault: {0}")]
    PermanentDatabase(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Check if an error is transient and worth an in-batch retry
pub fn is_transient(err: &PipelineError) -> bool {
    matches!(err, PipelineError::Database(_) | PipelineError::Io(_))
}
