//! Persistent, time-bucketed Merkle trie.
//!
//! Nodes live in an append-only arena and refer to each other by integer
//! handle. A node is never modified after it is written: `insert` copies the
//! nodes along one root-to-leaf path and leaves every other node shared, so
//! a cloned `MerkleTrie` is a stable snapshot that later inserts cannot
//! disturb.
//!
//! The arena is split into frozen, reference-counted chunks plus a small
//! tail, which keeps cloning cheap while inserts keep appending.

use crate::error::MerkleError;
use crate::hash::{Hash, Hasher};
use crate::key::{BucketKey, KEY_DEPTH, RADIX};
use crate::summary::{DiffStep, TrieSummary};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tally_hlc::Timestamp;

const CHUNK_SIZE: usize = 1024;

/// Handle of a node inside one trie's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NodeRef(u32);

#[derive(Clone, Debug, Default)]
struct TrieNode {
    hash: Hash,
    children: [Option<NodeRef>; RADIX],
}

#[derive(Clone, Default)]
struct NodeArena {
    frozen: Vec<Arc<[TrieNode]>>,
    tail: Arc<Vec<TrieNode>>,
}

impl NodeArena {
    fn len(&self) -> usize {
        self.frozen.len() * CHUNK_SIZE + self.tail.len()
    }

    fn get(&self, id: NodeRef) -> &TrieNode {
        let index = id.0 as usize;
        let chunk = index / CHUNK_SIZE;
        match self.frozen.get(chunk) {
            Some(nodes) => &nodes[index % CHUNK_SIZE],
            None => &self.tail[index % CHUNK_SIZE],
        }
    }

    fn push(&mut self, node: TrieNode) -> NodeRef {
        let id = NodeRef(self.len() as u32);
        let tail = Arc::make_mut(&mut self.tail);
        tail.push(node);
        if tail.len() == CHUNK_SIZE {
            let full = std::mem::take(tail);
            self.frozen.push(Arc::from(full));
        }
        id
    }
}

/// A Merkle trie over message timestamps, keyed by minute bucket.
///
/// Every node's hash is the XOR of the hashes of all timestamps beneath it,
/// so two tries holding the same set of timestamps have the same root hash
/// no matter the insertion order.
#[derive(Clone, Default)]
pub struct MerkleTrie {
    arena: NodeArena,
    root: Option<NodeRef>,
    garbage: usize,
}

impl MerkleTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a trie from scratch over a set of timestamps.
    pub fn rebuild<'a>(timestamps: impl IntoIterator<Item = &'a Timestamp>) -> Self {
        timestamps
            .into_iter()
            .fold(MerkleTrie::new(), |trie, timestamp| trie.insert(timestamp))
            .compact()
    }

    /// Root hash; zero for an empty trie.
    pub fn hash(&self) -> Hash {
        self.root.map(|id| self.arena.get(id).hash).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of arena slots, including nodes no longer reachable.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Number of arena slots superseded by path copies.
    pub fn garbage(&self) -> usize {
        self.garbage
    }

    /// Record one timestamp.
    ///
    /// Each distinct timestamp must be inserted exactly once: inserting it a
    /// second time cancels its contribution to every hash on the path.
    ///
    /// Every node's hash always covers everything inserted under its
    /// prefix. When the path leads through a node that has lost children to
    /// pruning and the next child is missing, the timestamp is absorbed into
    /// that node instead of starting a child that would only cover part of
    /// its range.
    pub fn insert(mut self, timestamp: &Timestamp) -> Self {
        let hash = Hasher::timestamp(timestamp);
        let key = BucketKey::from_millis(timestamp.millis());
        let root = self.root;
        self.root = Some(self.path_copy(root, key.digits(), hash));
        self
    }

    fn path_copy(&mut self, existing: Option<NodeRef>, digits: &[u8], hash: Hash) -> NodeRef {
        let (mut node, pruned) = match existing {
            Some(id) => {
                self.garbage += 1;
                let node = self.arena.get(id).clone();
                let pruned = !digits.is_empty() && !self.residual(&node).is_zero();
                (node, pruned)
            }
            None => (TrieNode::default(), false),
        };
        node.hash ^= hash;

        if let Some((&digit, rest)) = digits.split_first() {
            let slot = usize::from(digit);
            let child = node.children[slot];
            if child.is_some() || !pruned {
                node.children[slot] = Some(self.path_copy(child, rest, hash));
            }
        }
        self.arena.push(node)
    }

    /// Combined hash of whatever a node covers that no child accounts for.
    fn residual(&self, node: &TrieNode) -> Hash {
        node.children
            .iter()
            .flatten()
            .fold(node.hash, |acc, child| acc ^ self.arena.get(*child).hash)
    }

    fn lookup(&self, key: &BucketKey) -> Option<NodeRef> {
        key.digits().iter().try_fold(self.root?, |id, &digit| {
            self.arena.get(id).children[usize::from(digit)]
        })
    }

    /// Hash of the subtree at `key`; zero if absent.
    pub fn hash_at(&self, key: &BucketKey) -> Hash {
        self.lookup(key)
            .map(|id| self.arena.get(id).hash)
            .unwrap_or_default()
    }

    /// Summarize the node at `prefix` for a peer.
    pub fn summary(&self, prefix: &BucketKey) -> TrieSummary {
        let Some(id) = self.lookup(prefix) else {
            return TrieSummary::empty(prefix.clone());
        };
        let node = self.arena.get(id);
        let children = node
            .children
            .iter()
            .enumerate()
            .filter_map(|(digit, child)| child.map(|c| (digit as u8, self.arena.get(c).hash)))
            .collect();

        TrieSummary {
            prefix: prefix.clone(),
            hash: node.hash,
            children,
        }
    }

    /// Compare the local node at `remote.prefix` with a peer's summary of it.
    ///
    /// When several children differ the earliest one is chosen: older
    /// divergence means more missing history. If the parts of the node that
    /// no child accounts for (pruned history) disagree, the difference cannot
    /// be located any further and the node itself is the divergence point.
    pub fn diff_step(&self, remote: &TrieSummary) -> DiffStep {
        let local = self.summary(&remote.prefix);
        if local.hash == remote.hash {
            return DiffStep::Agree;
        }
        if remote.prefix.is_leaf() || local.residual() != remote.residual() {
            return DiffStep::Diverged(remote.prefix.clone());
        }

        let differing = (0..RADIX as u8).find(|digit| {
            let present =
                local.children.contains_key(digit) || remote.children.contains_key(digit);
            present && local.child_hash(*digit) != remote.child_hash(*digit)
        });

        match differing.and_then(|digit| remote.prefix.child(digit)) {
            Some(child) => DiffStep::Descend(child),
            None => DiffStep::Diverged(remote.prefix.clone()),
        }
    }

    /// Find the earliest bucket prefix at which two tries disagree.
    ///
    /// Returns `None` when the root hashes match.
    pub fn diff(&self, other: &MerkleTrie) -> Option<BucketKey> {
        let mut prefix = BucketKey::root();
        loop {
            match self.diff_step(&other.summary(&prefix)) {
                DiffStep::Agree if prefix.is_root() => return None,
                DiffStep::Agree => return Some(prefix),
                DiffStep::Descend(next) => prefix = next,
                DiffStep::Diverged(at) => return Some(at),
            }
        }
    }

    /// Keep only the `keep` most recent children at every level.
    ///
    /// Retained hashes are copied, not recomputed, so the root hash and the
    /// hash of every retained node are unchanged. `diff` treats a node whose
    /// pruned children disagree as the divergence point, which can only move
    /// the result earlier.
    pub fn prune(self, keep: usize) -> Self {
        self.rewrite(keep.max(1))
    }

    /// Drop arena slots that are no longer reachable from the root.
    pub fn compact(self) -> Self {
        self.rewrite(RADIX)
    }

    /// Compact once superseded slots outnumber live ones.
    pub fn maybe_compact(self) -> Self {
        if self.garbage * 2 > self.arena.len() {
            self.compact()
        } else {
            self
        }
    }

    fn rewrite(&self, keep: usize) -> Self {
        let mut out = MerkleTrie::new();
        out.root = self.root.map(|id| self.copy_into(&mut out.arena, id, keep));
        out
    }

    fn copy_into(&self, arena: &mut NodeArena, id: NodeRef, keep: usize) -> NodeRef {
        let node = self.arena.get(id);
        let present: Vec<usize> = (0..RADIX).filter(|&d| node.children[d].is_some()).collect();
        let skip = present.len().saturating_sub(keep);

        let mut copy = TrieNode {
            hash: node.hash,
            children: Default::default(),
        };
        for &digit in &present[skip..] {
            if let Some(child) = node.children[digit] {
                copy.children[digit] = Some(self.copy_into(arena, child, keep));
            }
        }
        arena.push(copy)
    }

    /// Full-depth keys of every reachable leaf bucket, in time order.
    pub fn bucket_keys(&self) -> Vec<BucketKey> {
        let mut keys = Vec::new();
        if let Some(root) = self.root {
            self.collect_leaves(root, BucketKey::root(), &mut keys);
        }
        keys
    }

    fn collect_leaves(&self, id: NodeRef, prefix: BucketKey, keys: &mut Vec<BucketKey>) {
        if prefix.is_leaf() {
            keys.push(prefix);
            return;
        }
        let node = self.arena.get(id);
        for (digit, child) in node.children.iter().enumerate() {
            if let (Some(child), Some(key)) = (child, prefix.child(digit as u8)) {
                self.collect_leaves(*child, key, keys);
            }
        }
    }

    fn to_serialized(&self, id: NodeRef) -> SerializedNode {
        let node = self.arena.get(id);
        SerializedNode {
            hash: node.hash,
            children: node
                .children
                .iter()
                .enumerate()
                .filter_map(|(digit, child)| child.map(|c| (digit as u8, self.to_serialized(c))))
                .collect(),
        }
    }

    fn load_node(
        arena: &mut NodeArena,
        doc: &SerializedNode,
        depth: usize,
    ) -> Result<NodeRef, MerkleError> {
        if depth > KEY_DEPTH {
            return Err(MerkleError::Malformed(format!(
                "node deeper than {} levels",
                KEY_DEPTH
            )));
        }
        let mut node = TrieNode {
            hash: doc.hash,
            children: Default::default(),
        };
        for (&digit, child) in &doc.children {
            let slot = usize::from(digit);
            if slot >= RADIX {
                return Err(MerkleError::Malformed(format!("child digit {}", digit)));
            }
            node.children[slot] = Some(Self::load_node(arena, child, depth + 1)?);
        }
        Ok(arena.push(node))
    }
}

impl fmt::Debug for MerkleTrie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleTrie")
            .field("hash", &self.hash())
            .field("nodes", &self.arena.len())
            .field("garbage", &self.garbage)
            .finish()
    }
}

/// Nested on-disk form: `{ "hash": .., "children": { "0": {..}, .. } }`.
#[derive(Serialize, Deserialize)]
struct SerializedNode {
    hash: Hash,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    children: BTreeMap<u8, SerializedNode>,
}

impl Serialize for MerkleTrie {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.root {
            Some(root) => self.to_serialized(root).serialize(serializer),
            None => SerializedNode {
                hash: Hash::zero(),
                children: BTreeMap::new(),
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MerkleTrie {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let doc = SerializedNode::deserialize(deserializer)?;
        let mut trie = MerkleTrie::new();
        if doc.hash.is_zero() && doc.children.is_empty() {
            return Ok(trie);
        }
        let root =
            Self::load_node(&mut trie.arena, &doc, 0).map_err(serde::de::Error::custom)?;
        trie.root = Some(root);
        Ok(trie)
    }
}
