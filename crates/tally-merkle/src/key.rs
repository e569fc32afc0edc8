//! Time-bucket keys.
//!
//! A message's key is the number of whole minutes since the Unix epoch,
//! written in base [`RADIX`] and left-padded to [`KEY_DEPTH`] digits, most
//! significant digit first. Sibling order therefore equals time order, and
//! a key prefix names a contiguous range of time.
//!
//! `RADIX`, `KEY_DEPTH` and [`BUCKET_MILLIS`] are compatibility constants:
//! replicas that disagree on them cannot compare tries.

use crate::error::MerkleError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Branching factor of the trie.
pub const RADIX: usize = 3;

/// Number of digits in a full key (the depth of a leaf).
///
/// 3^21 minutes reaches past year 9999, the limit of the timestamp codec.
pub const KEY_DEPTH: usize = 21;

/// Width of one leaf bucket.
pub const BUCKET_MILLIS: u64 = 60_000;

/// A path from the trie root: a sequence of base-3 digits.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(Vec<u8>);

impl BucketKey {
    /// The empty path.
    pub fn root() -> Self {
        BucketKey(Vec::new())
    }

    /// The full leaf key of the bucket containing `millis`.
    pub fn from_millis(millis: u64) -> Self {
        let mut minutes = millis / BUCKET_MILLIS;
        let mut digits = vec![0u8; KEY_DEPTH];
        for slot in digits.iter_mut().rev() {
            *slot = (minutes % RADIX as u64) as u8;
            minutes /= RADIX as u64;
        }
        BucketKey(digits)
    }

    /// Start of the time range this prefix covers.
    ///
    /// The key is right-padded with zeros to full depth before conversion.
    pub fn to_millis(&self) -> u64 {
        let minutes = self
            .0
            .iter()
            .chain(std::iter::repeat(&0u8))
            .take(KEY_DEPTH)
            .fold(0u64, |acc, &digit| acc * RADIX as u64 + u64::from(digit));
        minutes * BUCKET_MILLIS
    }

    /// Extend the path by one digit; `None` at leaf depth or for a bad digit.
    pub fn child(&self, digit: u8) -> Option<Self> {
        if self.0.len() >= KEY_DEPTH || usize::from(digit) >= RADIX {
            return None;
        }
        let mut digits = self.0.clone();
        digits.push(digit);
        Some(BucketKey(digits))
    }

    pub fn digits(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.0.len() == KEY_DEPTH
    }

    pub fn parse(s: &str) -> Result<Self, MerkleError> {
        if s.len() > KEY_DEPTH {
            return Err(MerkleError::InvalidKey(s.to_string()));
        }
        s.bytes()
            .map(|b| match b {
                b'0'..=b'2' => Ok(b - b'0'),
                _ => Err(MerkleError::InvalidKey(s.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(BucketKey)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for digit in &self.0 {
            write!(f, "{}", digit)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketKey({:?})", self.to_string())
    }
}

impl FromStr for BucketKey {
    type Err = MerkleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BucketKey::parse(s)
    }
}

impl Serialize for BucketKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BucketKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BucketKey::parse(&s).map_err(serde::de::Error::custom)
    }
}
