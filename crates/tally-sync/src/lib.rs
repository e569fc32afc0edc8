//! # tally-sync
//!
//! Merkle-guided reconciliation between Tally replicas.
//!
//! This crate provides:
//! - [`SyncRequest`] / [`SyncResponse`]: the request/response wire protocol
//! - [`SyncTransport`]: the transport seam, with an in-process
//!   [`MemoryTransport`] for tests and simulation
//! - [`SyncServer`]: answers a peer's requests against a local replica
//! - [`Reconciler`]: the client-side state machine that exchanges clocks,
//!   locates the earliest divergence and transfers messages until both
//!   tries agree
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tally_hlc::{ManualClock, NodeId};
//! use tally_store::{CellAddress, MemoryPersistence, Replica, ReplicaConfigBuilder, Value};
//! use tally_sync::{MemoryTransport, Reconciler, SyncServer};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let wall = Arc::new(ManualClock::new(1_700_000_000_000));
//! let open = |id: &str| {
//!     let config = ReplicaConfigBuilder::new().node_id(NodeId::new(id).unwrap()).build();
//!     Arc::new(Replica::open(MemoryPersistence::new(), wall.clone(), config).unwrap())
//! };
//! let (a, b) = (open("A"), open("B"));
//!
//! let cell = CellAddress::new("budget1", "cat7", "amount");
//! b.edit(cell.clone(), 300i64).unwrap();
//!
//! let transport = MemoryTransport::connect(Arc::new(SyncServer::new(b.clone())));
//! let mut reconciler = Reconciler::new(a.clone(), transport);
//! reconciler.run_cycle().await.unwrap();
//!
//! assert_eq!(a.value(&cell), Some(Value::Number(300.0)));
//! assert_eq!(a.merkle().hash(), b.merkle().hash());
//! # });
//! ```

mod error;
mod proto;
mod reconciler;
mod server;
mod transport;

pub use error::{Result, SyncError, TransportError};
pub use proto::{RejectReason, SyncRequest, SyncResponse};
pub use reconciler::{
    Reconciler, SyncConfig, SyncConfigBuilder, SyncReport, SyncState, DEFAULT_MAX_ROUNDS,
    DEFAULT_PAGE_SIZE,
};
pub use server::{SyncServer, MAX_PAGE_SIZE};
pub use transport::{MemoryTransport, SyncTransport};
