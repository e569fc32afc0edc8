//! # tally-merkle
//!
//! Time-bucketed Merkle trie for detecting where two replicas diverge.
//!
//! This crate provides:
//! - [`BucketKey`]: base-3 minute keys whose order matches time order
//! - [`Hash`] and the XOR combiner, so a node's hash depends only on the
//!   set of messages beneath it
//! - [`MerkleTrie`]: a persistent trie with `insert`, `diff`, `prune` and
//!   `rebuild`
//! - [`TrieSummary`] / [`DiffStep`] for comparing tries one node at a time
//!   across the network
//!
//! ## Example
//!
//! ```rust
//! use tally_hlc::{NodeId, Timestamp};
//! use tally_merkle::MerkleTrie;
//!
//! let node = NodeId::new("1").unwrap();
//! let a = Timestamp::new(1_700_000_000_000, 0, node.clone());
//! let b = Timestamp::new(1_700_000_090_000, 0, node);
//!
//! let left = MerkleTrie::new().insert(&a).insert(&b);
//! let right = MerkleTrie::new().insert(&b).insert(&a);
//! assert_eq!(left.hash(), right.hash());
//! assert_eq!(left.diff(&right), None);
//!
//! let behind = MerkleTrie::new().insert(&b);
//! let key = left.diff(&behind).unwrap();
//! assert!(key.to_millis() <= a.millis());
//! ```

mod error;
mod hash;
mod key;
mod summary;
mod trie;

pub use error::MerkleError;
pub use hash::{Hash, Hasher};
pub use key::{BucketKey, BUCKET_MILLIS, KEY_DEPTH, RADIX};
pub use summary::{DiffStep, TrieSummary};
pub use trie::MerkleTrie;
