//! Error taxonomy for the retrieval engine.
//!
//! Library functions return [`Result<T>`]. The CLI wraps these in
//! `anyhow` at the command boundary.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the engine.
#[derive(Debug, Error)]
pub enum RecallError {
    /// Empty content, missing filename, or undecodable bytes.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(#[from] EmbeddingError),

    /// The keyword or vector index diverged from the document table.
    /// Treated as fatal by every caller.
    #[error("index consistency error: {0}")]
    IndexConsistency(String),

    /// Malformed or contradictory search filters.
    #[error("query filter error: {0}")]
    QueryFilter(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RecallError {
    /// Whether the error should abort a batch run rather than be recorded
    /// against a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RecallError::Storage(_) | RecallError::IndexConsistency(_)
        )
    }
}

/// Failures raised by an [`EmbeddingProvider`](crate::embedding::EmbeddingProvider).
#[derive(Debug, Error, Clone)]
pub enum EmbeddingError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("expected {expected}-dimensional vector, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("http error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, RecallError>;
