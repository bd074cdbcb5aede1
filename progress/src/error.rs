//! Progress tracking error types.

use thiserror::Error;

pub type ProgressResult<T> = Result<T, ProgressError>;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Operation already exists: {0}")]
    OperationExists(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Operation is finalized: {0}")]
    OperationFinalized(String),

    #[error("Tracker is shut down")]
    Shutdown,
}
