//! Fixed-width hashes and the order-independent combiner.
//!
//! Each message contributes the SHA-256 of its canonical timestamp string.
//! Hashes combine by XOR, so a node's hash depends only on the set of
//! messages beneath it, never on insertion order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::{BitXor, BitXorAssign};
use tally_hlc::Timestamp;

/// A 32-byte SHA-256 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Create a hash from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The hash of an empty set of messages.
    pub fn zero() -> Self {
        Hash([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Convert to hex string for display.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Create from hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(hex_str, 16).ok()?;
        }
        Some(Hash(bytes))
    }

    /// Truncated display (first 8 chars).
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl BitXor for Hash {
    type Output = Hash;

    fn bitxor(mut self, rhs: Hash) -> Hash {
        self ^= rhs;
        self
    }
}

impl BitXorAssign for Hash {
    fn bitxor_assign(&mut self, rhs: Hash) {
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a ^= b;
        }
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", self.short())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::zero()
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid hash: {:?}", s)))
    }
}

/// Hasher utility for computing content hashes.
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Hasher {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Hash {
        let result = self.inner.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Hash(bytes)
    }

    /// Hash data directly.
    pub fn hash(data: &[u8]) -> Hash {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// The trie contribution of one message, keyed by its timestamp.
    pub fn timestamp(timestamp: &Timestamp) -> Hash {
        Self::hash(timestamp.to_string().as_bytes())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_hlc::NodeId;

    #[test]
    fn test_hash_deterministic() {
        let h1 = Hasher::hash(b"hello world");
        let h2 = Hasher::hash(b"hello world");
        assert_eq!(h1, h2);
        assert_ne!(h1, Hasher::hash(b"hello"));
    }

    #[test]
    fn test_hex_roundtrip() {
        let h1 = Hasher::hash(b"test data");
        let h2 = Hash::from_hex(&h1.to_hex()).unwrap();
        assert_eq!(h1, h2);
        assert!(Hash::from_hex("zz").is_none());
    }

    #[test]
    fn test_xor_combiner() {
        let a = Hasher::hash(b"a");
        let b = Hasher::hash(b"b");
        let c = Hasher::hash(b"c");

        assert_eq!(a ^ b, b ^ a);
        assert_eq!((a ^ b) ^ c, a ^ (b ^ c));
        assert_eq!(a ^ Hash::zero(), a);
        assert!((a ^ a).is_zero());
    }

    #[test]
    fn test_timestamp_hash_uses_canonical_form() {
        let ts = Timestamp::new(10, 0, NodeId::new("1").unwrap());
        assert_eq!(Hasher::timestamp(&ts), Hasher::hash(ts.to_string().as_bytes()));
    }

    #[test]
    fn test_serde_hex() {
        let h = Hasher::hash(b"x");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", h.to_hex()));
        assert_eq!(serde_json::from_str::<Hash>(&json).unwrap(), h);
    }
}
