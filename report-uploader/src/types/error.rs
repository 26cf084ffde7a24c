//! Error types shared by every pipeline stage

use thiserror::Error;

use crate::storage::BucketError;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur while resolving, transforming or uploading a payload
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or invalid credentials, URLs or settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Network failure or non-success response on download or upload
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// An expected file, field or pattern is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed JSON or CSV
    #[error("Parse error: {0}")]
    Parse(String),
}

impl PipelineError {
    /// Whether the error must stop the run before anything else is attempted
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transfer(error.to_string())
    }
}

impl From<reqwest_middleware::Error> for PipelineError {
    fn from(error: reqwest_middleware::Error) -> Self {
        Self::Transfer(error.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(format!("invalid JSON: {error}"))
    }
}

impl From<csv::Error> for PipelineError {
    fn from(error: csv::Error) -> Self {
        Self::Parse(format!("invalid CSV: {error}"))
    }
}

impl From<BucketError> for PipelineError {
    fn from(error: BucketError) -> Self {
        match error {
            BucketError::ConfigError(msg) => Self::Configuration(msg),
            other => Self::Transfer(other.to_string()),
        }
    }
}
