// smartpixl-classify: Error types

use thiserror::Error;

/// Classify result type
pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// Classify error types
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Range file error: {0}")]
    RangeFile(String),

    #[error("Geo lookup error: {0}")]
    GeoLookup(String),
}
