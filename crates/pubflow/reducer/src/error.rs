//! Reducer error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while extracting a hierarchy or reducing an artifact
#[derive(Debug, Error)]
pub enum ReducerError {
    /// A selection names a field the master artifact does not have
    #[error("The requested reduction field {field} is not found in the reduction hierarchy")]
    FieldNotFound { field: String },

    #[error("Master file {} does not exist", path.display())]
    MasterMissing { path: PathBuf },

    #[error("Reduction canceled")]
    Canceled,

    /// The artifact could not be parsed
    #[error("Invalid content format: {0}")]
    Format(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReducerError {
    pub fn is_field_not_found(&self) -> bool {
        matches!(self, ReducerError::FieldNotFound { .. })
    }
}

/// Result type for reducer operations
pub type ReducerResult<T> = Result<T, ReducerError>;
