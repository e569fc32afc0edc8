//! The persisted clock: HLC state plus the Merkle trie of applied messages.
//!
//! On disk the clock is a small JSON document:
//!
//! ```json
//! { "timestamp": "2024-01-01T00:00:00.000Z-0000-0000000000000001", "merkle": { "hash": "..." } }
//! ```

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use tally_hlc::{ClockConfig, Hlc, NodeId, Timestamp};
use tally_merkle::MerkleTrie;

/// A replica's clock state.
#[derive(Clone, Debug)]
pub struct Clock {
    pub hlc: Hlc,
    pub merkle: MerkleTrie,
}

impl Clock {
    /// Seed a clock from its last timestamp and trie.
    pub fn new(timestamp: Timestamp, merkle: MerkleTrie, config: ClockConfig) -> Self {
        Clock {
            hlc: Hlc::new(timestamp, config),
            merkle,
        }
    }

    /// A clock for a replica that has never written or received anything.
    pub fn fresh(node: NodeId, config: ClockConfig) -> Self {
        Clock {
            hlc: Hlc::fresh(node, config),
            merkle: MerkleTrie::new(),
        }
    }

    pub fn timestamp(&self) -> &Timestamp {
        self.hlc.timestamp()
    }
}

#[derive(Serialize)]
struct ClockDocRef<'a> {
    timestamp: &'a Timestamp,
    merkle: &'a MerkleTrie,
}

#[derive(Deserialize)]
struct ClockDoc {
    timestamp: Timestamp,
    merkle: MerkleTrie,
}

/// Serialize a clock to its JSON document.
pub fn serialize_clock(clock: &Clock) -> Result<String> {
    let doc = ClockDocRef {
        timestamp: clock.timestamp(),
        merkle: &clock.merkle,
    };
    serde_json::to_string(&doc).map_err(|e| StoreError::CorruptClock(e.to_string()))
}

/// Parse a clock document. Corrupt input is rejected, never repaired.
pub fn deserialize_clock(s: &str, config: ClockConfig) -> Result<Clock> {
    let doc: ClockDoc =
        serde_json::from_str(s).map_err(|e| StoreError::CorruptClock(e.to_string()))?;
    Ok(Clock::new(doc.timestamp, doc.merkle, config))
}
