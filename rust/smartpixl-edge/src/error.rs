// smartpixl-edge: Error types

use thiserror::Error;

/// Edge result type
pub type EdgeResult<T> = Result<T, EdgeError>;

/// Edge error types
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] smartpixl_pipeline::PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
