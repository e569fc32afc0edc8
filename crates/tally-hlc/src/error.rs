//! Error types for clock and codec operations.

use crate::node::NodeId;
use thiserror::Error;

/// Errors raised by [`Hlc::send`](crate::Hlc::send) and [`Hlc::recv`](crate::Hlc::recv).
///
/// None of these are ever recovered from silently: advancing past a clock
/// anomaly would corrupt causal order for every later comparison.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("clock drift: time {millis} is more than {max_drift_ms}ms ahead of wall clock {wall}")]
    Drift {
        millis: u64,
        wall: i64,
        max_drift_ms: u64,
    },

    #[error("timestamp counter overflow at {millis} (counter exceeded {max})")]
    Overflow { millis: u64, max: u16 },

    #[error("duplicate node id {0}: two replicas share one identity")]
    DuplicateNode(NodeId),
}

impl ClockError {
    /// True for the drift family: an out-of-tolerance clock or a runaway counter.
    pub fn is_drift(&self) -> bool {
        matches!(self, ClockError::Drift { .. } | ClockError::Overflow { .. })
    }
}

/// Errors raised while decoding persisted or received timestamps.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("invalid node id: {0:?}")]
    InvalidNode(String),

    #[error("invalid value encoding: {0:?}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, ClockError>;
