//! # tally-store
//!
//! Message log, last-writer-wins applier and replica state for the Tally
//! sync engine.
//!
//! This crate provides:
//! - [`Message`] / [`Value`]: timestamped cell writes and their wire form
//! - [`MessageStore`]: the full, idempotent message history with
//!   last-writer-wins visible values
//! - [`Clock`]: HLC state plus Merkle trie, and its JSON document form
//! - [`Persistence`] backends (in-memory and directory-based)
//! - [`Replica`]: the single-writer façade tying them together
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tally_hlc::{ManualClock, NodeId};
//! use tally_store::{CellAddress, MemoryPersistence, Replica, ReplicaConfigBuilder, Value};
//!
//! let wall = Arc::new(ManualClock::new(1_700_000_000_000));
//! let config = ReplicaConfigBuilder::new()
//!     .node_id(NodeId::new("A1").unwrap())
//!     .build();
//! let replica = Replica::open(MemoryPersistence::new(), wall, config).unwrap();
//!
//! let cell = CellAddress::new("budget1", "cat7", "amount");
//! replica.edit(cell.clone(), 500i64).unwrap();
//! assert_eq!(replica.value(&cell), Some(Value::Number(500.0)));
//! ```

mod clock;
mod error;
mod message;
mod persistence;
mod replica;
mod store;
mod value;

pub use clock::{deserialize_clock, serialize_clock, Clock};
pub use error::{Result, StorageError, StoreError};
pub use message::{CellAddress, Message};
pub use persistence::{FilePersistence, MemoryPersistence, PersistedState, Persistence};
pub use replica::{
    ApplyReport, MessagePage, Replica, ReplicaConfig, ReplicaConfigBuilder,
};
pub use store::{ApplyOutcome, MessageStore};
pub use value::Value;
