//! Stage-level error type

use thiserror::Error;

/// Failure of a single transformation stage for a single call
///
/// Stage errors are isolated by the engine: the failing stage keeps its
/// pre-failure state and emits nothing for that call, the remaining stages
/// still run, and the error is logged rather than propagated.
#[derive(Debug, Error)]
pub enum StageError {
    /// A buffered accumulation grew past its guard limit
    #[error("{stage}: pending buffer exceeded {limit} bytes")]
    BufferOverflow { stage: &'static str, limit: usize },

    /// A turn accumulated more records than the guard limit allows
    #[error("{stage}: {detail}")]
    LimitExceeded { stage: &'static str, detail: String },
}
