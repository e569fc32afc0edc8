//! Error types for the store and replica layer.

use tally_hlc::{ClockError, CodecError};
use thiserror::Error;

/// Failures reported by a [`Persistence`](crate::Persistence) backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur in replica operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Corrupt clock: {0}")]
    CorruptClock(String),
}

impl StoreError {
    /// Storage failures may succeed on retry; clock and codec errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
