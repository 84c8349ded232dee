// smartpixl-forge: Error types

use thiserror::Error;

/// Forge result type
pub type ForgeResult<T> = Result<T, ForgeError>;

/// Forge error types
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] smartpixl_pipeline::PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
