//! Coordinator errors

use pleiades_core::SinkError;
use pleiades_sse::StreamError;
use thiserror::Error;

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Invalid options
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The sink could not be created or failed its preflight check
    #[error("Sink setup failed: {0}")]
    Sink(#[from] SinkError),

    /// The stream client could not be created
    #[error("Stream client setup failed: {0}")]
    Stream(#[from] StreamError),

    /// A pipeline task panicked or was cancelled
    #[error("{task} task failed: {reason}")]
    Task { task: &'static str, reason: String },
}

impl CoordinatorError {
    pub(crate) fn task(task: &'static str, e: tokio::task::JoinError) -> Self {
        CoordinatorError::Task {
            task,
            reason: e.to_string(),
        }
    }
}
