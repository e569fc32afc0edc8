//! Error types for reconciliation.

use crate::proto::RejectReason;
use tally_hlc::ClockError;
use tally_store::StoreError;
use thiserror::Error;

/// Failures of the transport collaborator. Always retryable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected")]
    Disconnected,

    #[error("Request timed out")]
    Timeout,

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Errors that abort a reconciliation cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A local clock check failed. Never retried automatically.
    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error("Replica error: {0}")]
    Store(StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Peer rejected request ({reason:?}): {message}")]
    Rejected {
        reason: RejectReason,
        message: String,
    },

    #[error("Unexpected {response} response to {request} request")]
    Protocol {
        request: &'static str,
        response: &'static str,
    },

    #[error("Replicas still out of sync after {rounds} rounds")]
    OutOfSync { rounds: usize },
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Clock(e) => SyncError::Clock(e),
            other => SyncError::Store(other),
        }
    }
}

impl SyncError {
    /// True if simply running the cycle again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) => true,
            SyncError::Store(e) => e.is_retryable(),
            SyncError::Rejected { reason, .. } => *reason == RejectReason::Storage,
            _ => false,
        }
    }

    /// True for clock drift or counter overflow on either side.
    pub fn is_drift(&self) -> bool {
        match self {
            SyncError::Clock(e) => e.is_drift(),
            SyncError::Rejected { reason, .. } => *reason == RejectReason::ClockDrift,
            _ => false,
        }
    }

    /// True when the two replicas share a node id; needs an operator.
    pub fn is_duplicate_node(&self) -> bool {
        match self {
            SyncError::Clock(e) => matches!(e, ClockError::DuplicateNode(_)),
            SyncError::Rejected { reason, .. } => *reason == RejectReason::DuplicateNode,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tally_hlc::NodeId;
    use tally_store::StorageError;

    #[test]
    fn test_retryable() {
        assert!(SyncError::Transport(TransportError::Disconnected).is_retryable());
        assert!(SyncError::from(StoreError::Storage(StorageError::Unavailable("x".into()))).is_retryable());
        assert!(!SyncError::OutOfSync { rounds: 100 }.is_retryable());
        assert!(!SyncError::Clock(ClockError::DuplicateNode(NodeId::zero())).is_retryable());
    }

    #[test]
    fn test_store_clock_errors_surface_as_clock() {
        let err = SyncError::from(StoreError::Clock(ClockError::DuplicateNode(NodeId::zero())));
        assert!(err.is_duplicate_node());
        assert!(!err.is_drift());

        let rejected = SyncError::Rejected {
            reason: RejectReason::ClockDrift,
            message: String::new(),
        };
        assert!(rejected.is_drift());
    }
}
