//! Messages: one timestamped write to one cell.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use tally_hlc::Timestamp;

/// Address of one cell: `(dataset, row, column)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    pub dataset: String,
    pub row: String,
    pub column: String,
}

impl CellAddress {
    pub fn new(
        dataset: impl Into<String>,
        row: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        CellAddress {
            dataset: dataset.into(),
            row: row.into(),
            column: column.into(),
        }
    }

    /// The first address of a row, in address order.
    pub(crate) fn row_start(dataset: &str, row: &str) -> Self {
        CellAddress::new(dataset, row, "")
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.dataset, self.row, self.column)
    }
}

/// A single timestamped write.
///
/// Two messages are the same message when their address and timestamp are
/// equal; applying one twice is a no-op.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub dataset: String,
    pub row: String,
    pub column: String,
    pub value: Value,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn new(address: CellAddress, value: impl Into<Value>, timestamp: Timestamp) -> Self {
        Message {
            dataset: address.dataset,
            row: address.row,
            column: address.column,
            value: value.into(),
            timestamp,
        }
    }

    pub fn address(&self) -> CellAddress {
        CellAddress::new(&self.dataset, &self.row, &self.column)
    }

    /// Identity of the message in the log.
    pub(crate) fn log_key(&self) -> (Timestamp, CellAddress) {
        (self.timestamp.clone(), self.address())
    }
}
