// smartpixl-record: Error types

use thiserror::Error;

/// Record result type
pub type RecordResult<T> = Result<T, RecordError>;

/// Record error types
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frame of {0} bytes exceeds protocol limit")]
    FrameTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecordError {
    /// True when the frame stream may have lost byte alignment and the
    /// connection must be dropped rather than resynchronized
    pub fn desyncs_stream(&self) -> bool {
        matches!(self, RecordError::FrameTooLarge(_) | RecordError::Io(_))
    }
}
