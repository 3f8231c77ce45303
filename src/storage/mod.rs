//! Key/value storage substrate for the session repository
//!
//! Provides interchangeable backends:
//! - In-memory (default, lost on restart)
//! - File-based (one file per key, persisted to disk)
//! - SQLite (embedded database via sqlx)

mod file;
mod memory;
mod sqlite;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a storage backend
///
/// Storage failures indicate durability risk and are always propagated to the
/// caller, never swallowed.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem-level failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Embedded database failure
    #[error("database error: {0}")]
    Database(String),

    /// Backend-specific failure
    #[error("storage error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for key/value storage backends
///
/// Keys are flat strings; hierarchy is expressed with `:`-separated prefixes
/// and queried through [`Storage::scan_prefix`]. No multi-key transaction is
/// offered; callers needing consistency across related keys must serialize
/// those writes themselves.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// All keys starting with `prefix`, sorted ascending
    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
