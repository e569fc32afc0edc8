//! Wire summaries exchanged during trie comparison.
//!
//! Peers never ship whole tries. One round trip carries a single node: its
//! path prefix, its hash and the hashes of its direct children, which is
//! enough for the other side to pick the next branch to descend into.

use crate::hash::Hash;
use crate::key::BucketKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One trie node as seen by a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieSummary {
    /// Path of the summarized node.
    pub prefix: BucketKey,

    /// Hash of everything under `prefix` (zero if the node does not exist).
    pub hash: Hash,

    /// Hashes of the node's existing children, keyed by digit.
    pub children: BTreeMap<u8, Hash>,
}

impl TrieSummary {
    /// Summary of a node that does not exist.
    pub fn empty(prefix: BucketKey) -> Self {
        TrieSummary {
            prefix,
            hash: Hash::zero(),
            children: BTreeMap::new(),
        }
    }

    /// Hash of child `digit`, zero if absent.
    pub fn child_hash(&self, digit: u8) -> Hash {
        self.children.get(&digit).copied().unwrap_or_default()
    }

    /// Combined hash of children missing from `children`.
    ///
    /// Non-zero only when the node has been pruned. Pruning keeps the most
    /// recent children, so whatever the residual covers is older than every
    /// listed child.
    pub fn residual(&self) -> Hash {
        self.children.values().fold(self.hash, |acc, h| acc ^ *h)
    }
}

/// Outcome of comparing the local trie against one remote summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffStep {
    /// Both sides hold the same messages under the summarized prefix.
    Agree,

    /// Hashes differ; the earliest differing child should be examined next.
    Descend(BucketKey),

    /// Hashes differ and there is nothing further to descend into: this is
    /// the divergence point.
    Diverged(BucketKey),
}
