//! # tally-hlc
//!
//! Hybrid Logical Clock and timestamp codec for the Tally sync engine.
//!
//! This crate provides:
//! - [`Timestamp`]: a `(millis, counter, node)` triple with a strict total order
//! - A fixed-width, lexicographically sortable string encoding for timestamps
//! - [`Hlc`]: the `send`/`recv` clock with drift, overflow and duplicate-node checks
//! - [`WallClock`] sources for real and simulated time
//!
//! ## Example
//!
//! ```rust
//! use tally_hlc::{ClockConfig, Hlc, NodeId, Timestamp};
//!
//! let mut clock = Hlc::fresh(NodeId::new("A1").unwrap(), ClockConfig::default());
//! let first = clock.send(1_000).unwrap();
//! let second = clock.send(1_000).unwrap();
//! assert!(second > first);
//!
//! let encoded = second.to_string();
//! assert_eq!(encoded, "1970-01-01T00:00:01.000Z-0001-00000000000000A1");
//! assert_eq!(encoded.parse::<Timestamp>().unwrap(), second);
//! ```

mod clock;
mod error;
mod node;
mod timestamp;
mod wall;

pub use clock::{ClockConfig, ClockConfigBuilder, Hlc, DEFAULT_MAX_DRIFT_MS};
pub use error::{ClockError, CodecError};
pub use node::{NodeId, NODE_LEN};
pub use timestamp::{Timestamp, ENCODED_LEN, MAX_COUNTER, MAX_MILLIS};
pub use wall::{ManualClock, SystemClock, WallClock};
