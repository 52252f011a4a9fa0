//! Engine error types

use pubflow_reducer::ReducerError;
use pubflow_store::StorageError;
use thiserror::Error;

/// Errors that cross an engine component boundary
///
/// Validation failures on a record are written to that record's status
/// message instead of surfacing here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Reducer error: {0}")]
    Reducer(#[from] ReducerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the record's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Audit log error: {0}")]
    Audit(String),

    #[error("Operation canceled")]
    Canceled,
}

impl EngineError {
    /// True when a conditional update lost a race
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Storage(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_) | EngineError::Storage(StorageError::NotFound(_))
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
