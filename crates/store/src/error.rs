//! Storage errors

use thiserror::Error;

/// Errors raised by storage adapters
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl From<StoreError> for lifeline_core::Error {
    fn from(error: StoreError) -> Self {
        lifeline_core::Error::internal(error.to_string())
    }
}

/// Conflict for a compare-and-set write that carried an outdated version
pub(crate) fn stale(kind: &str, id: impl std::fmt::Display, expected: u64, found: u64) -> lifeline_core::Error {
    lifeline_core::Error::conflict(format!(
        "{kind} {id} was modified concurrently (expected version {expected}, found {found})"
    ))
}
