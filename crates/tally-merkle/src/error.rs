//! Error types for trie operations.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Invalid bucket key: {0:?}")]
    InvalidKey(String),

    #[error("Malformed trie: {0}")]
    Malformed(String),
}
