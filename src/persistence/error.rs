//! Error types for the persistence layer

use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised by the session repository
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The backing store failed; indicates durability risk
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A record could not be encoded for storage
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Serialization(err.to_string())
    }
}

/// Result type alias for repository operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;
