// Error handling for the battery pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Domain error: {0}")]
    Domain(String),

    #[error("Incomplete test window: expected {expected} records, got {actual}")]
    IncompleteWindow { expected: usize, actual: usize },

    #[error("Insufficient pool for battery {group}: {available} eligible cells, quota {quota}")]
    InsufficientPool {
        group: String,
        available: usize,
        quota: usize,
    },

    #[error("Storage error on {path}: {message}")]
    Storage { path: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn domain(message: impl Into<String>) -> Self {
        PipelineError::Domain(message.into())
    }

    pub fn storage(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        PipelineError::Storage {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
