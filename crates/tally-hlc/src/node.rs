//! Replica identity.

use crate::error::CodecError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Width of a node id in its canonical form.
pub const NODE_LEN: usize = 16;

/// A stable, globally unique replica identifier.
///
/// Always exactly [`NODE_LEN`] ASCII alphanumeric characters. Ordering is
/// byte-wise, which matches the ordering of the encoded timestamp strings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id, left-padding short ids with `'0'`.
    pub fn new(id: impl AsRef<str>) -> Result<Self, CodecError> {
        let id = id.as_ref();
        if id.is_empty() || id.len() > NODE_LEN || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CodecError::InvalidNode(id.to_string()));
        }
        Ok(NodeId(format!("{:0>width$}", id, width = NODE_LEN)))
    }

    /// Generate a fresh random node id (16 uppercase hex digits).
    pub fn random() -> Self {
        NodeId(format!("{:016X}", rand::random::<u64>()))
    }

    /// The all-zero node, used for lower-bound timestamps.
    pub fn zero() -> Self {
        NodeId("0".repeat(NODE_LEN))
    }

    /// The greatest node id, used for upper-bound timestamps.
    pub fn max() -> Self {
        NodeId("z".repeat(NODE_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse only the canonical (already padded) form.
    pub(crate) fn parse_exact(s: &str) -> Result<Self, CodecError> {
        if s.len() != NODE_LEN {
            return Err(CodecError::InvalidNode(s.to_string()));
        }
        NodeId::new(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl FromStr for NodeId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeId::new(s)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::parse_exact(&s).map_err(serde::de::Error::custom)
    }
}
