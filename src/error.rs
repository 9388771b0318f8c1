use std::time::Duration;
use thiserror::Error;

/// Typed failures for the alarm and analysis request paths.
///
/// Ingestion-path failures (batch persistence, notification delivery) are
/// logged and counted where they happen and never surface to producers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("external script timed out after {0:?}")]
    Timeout(Duration),

    #[error("external script processing failed: {0}")]
    Processing(String),
}

impl CoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }
}
