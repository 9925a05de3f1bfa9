use thiserror::Error;

/// Errors surfaced by the frame pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline not initialized")]
    NotInitialized,

    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Errors from an inference backend call.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model not loaded")]
    ModelNotLoaded,

    #[error("unexpected tensor shape: expected {expected}, got {actual:?}")]
    Shape { expected: String, actual: Vec<usize> },

    #[error("backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
