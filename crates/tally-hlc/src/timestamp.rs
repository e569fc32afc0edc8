//! Hybrid logical timestamps and their fixed-width sortable encoding.
//!
//! The canonical string form is
//!
//! ```text
//! 2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF
//! └──── millis (ISO-8601) ───┘ └ctr┘ └──── node ────┘
//! ```
//!
//! Every field is fixed width, so plain string comparison of two encoded
//! timestamps gives the same answer as comparing the timestamps themselves.
//! Storage layers rely on this, which is why parsing is strict.

use crate::error::CodecError;
use crate::node::NodeId;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Largest logical counter value.
pub const MAX_COUNTER: u16 = u16::MAX;

/// Largest encodable wall time: 9999-12-31T23:59:59.999Z.
pub const MAX_MILLIS: u64 = 253_402_300_799_999;

/// Length of the canonical string form.
pub const ENCODED_LEN: usize = 46;

const DATE_LEN: usize = 24;
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// A globally comparable, causally ordered timestamp.
///
/// Ordered by `(millis, counter, node)`. Distinct nodes never share a
/// `(millis, counter)` pair in a way that makes two timestamps equal, so
/// this is a strict total order usable as a last-writer-wins tie-break.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    millis: u64,
    counter: u16,
    node: NodeId,
}

impl Timestamp {
    pub fn new(millis: u64, counter: u16, node: NodeId) -> Self {
        Timestamp {
            millis,
            counter,
            node,
        }
    }

    /// The smallest timestamp.
    pub fn zero() -> Self {
        Timestamp::new(0, 0, NodeId::zero())
    }

    /// The largest encodable timestamp.
    pub fn max() -> Self {
        Timestamp::new(MAX_MILLIS, MAX_COUNTER, NodeId::max())
    }

    /// Lower bound for every timestamp issued at or after `millis`.
    pub fn since(millis: u64) -> Self {
        Timestamp::new(millis, 0, NodeId::zero())
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn counter(&self) -> u16 {
        self.counter
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Decode the canonical string form.
    ///
    /// Rejects anything that would not re-encode to exactly the same string.
    pub fn parse(s: &str) -> Result<Self, CodecError> {
        let invalid = || CodecError::InvalidTimestamp(s.to_string());

        if s.len() != ENCODED_LEN || !s.is_ascii() {
            return Err(invalid());
        }

        let (date, rest) = s.split_at(DATE_LEN);
        let rest_bytes = rest.as_bytes();
        if rest_bytes[0] != b'-' || rest_bytes[5] != b'-' {
            return Err(invalid());
        }

        let counter_hex = &rest[1..5];
        if !counter_hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
        {
            return Err(invalid());
        }
        let counter = u16::from_str_radix(counter_hex, 16).map_err(|_| invalid())?;
        let node = NodeId::parse_exact(&rest[6..]).map_err(|_| invalid())?;

        let naive = NaiveDateTime::parse_from_str(date, DATE_FORMAT).map_err(|_| invalid())?;
        let millis = naive.and_utc().timestamp_millis();
        if millis < 0 || millis as u64 > MAX_MILLIS {
            return Err(invalid());
        }

        let timestamp = Timestamp::new(millis as u64, counter, node);
        if timestamp.to_string() != s {
            return Err(invalid());
        }
        Ok(timestamp)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = i64::try_from(self.millis).map_err(|_| fmt::Error)?;
        let date = DateTime::<Utc>::from_timestamp_millis(millis).ok_or(fmt::Error)?;
        write!(
            f,
            "{}-{:04X}-{}",
            date.format(DATE_FORMAT),
            self.counter,
            self.node
        )
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {}, {})", self.millis, self.counter, self.node)
    }
}

impl FromStr for Timestamp {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timestamp::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn test_encoding_layout() {
        let ts = Timestamp::new(10, 0, node("1"));
        assert_eq!(ts.to_string(), "1970-01-01T00:00:00.010Z-0000-0000000000000001");
        assert_eq!(ts.to_string().len(), ENCODED_LEN);
    }

    #[test]
    fn test_parse_valid() {
        let inputs = [
            "1970-01-01T00:00:00.000Z-0000-0000000000000000",
            "2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF",
            "9999-12-31T23:59:59.999Z-FFFF-FFFFFFFFFFFFFFFF",
        ];
        for input in inputs {
            let parsed = Timestamp::parse(input).unwrap();
            assert!(parsed.millis() <= MAX_MILLIS);
            assert_eq!(parsed.to_string(), input);
        }

        let parsed = Timestamp::parse(inputs[1]).unwrap();
        assert_eq!(parsed.millis(), 1_429_914_222_123);
        assert_eq!(parsed.counter(), 0x1000);
        assert_eq!(parsed.node().as_str(), "0123456789ABCDEF");
    }

    #[test]
    fn test_parse_invalid() {
        let inputs = [
            "",
            " ",
            "0",
            "invalid",
            "1969-1-1T0:0:0.0Z-0-0-0",
            "1969-01-01T00:00:00.000Z-0000-0000000000000000",
            "10000-01-01T00:00:00.000Z-FFFF-FFFFFFFFFFFFFFFF",
            "9999-12-31T23:59:59.999Z-10000-FFFFFFFFFFFFFFFF",
            "9999-12-31T23:59:59.999Z-FFFF-10000000000000000",
            "2015-04-24T22:23:42.123Z-10a0-0123456789ABCDEF",
            "2015-04-24T22:23:42.123Z-+100-0123456789ABCDEF",
            "2015-04-24T22:23:42.123Z_1000-0123456789ABCDEF",
            "2015-13-24T22:23:42.123Z-1000-0123456789ABCDEF",
            "2015-04-24 22:23:42.123Z-1000-0123456789ABCDEF",
            "2015-04-24T22:23:42.123Z-1000-0123456789ABCDE-",
        ];
        for input in inputs {
            assert!(Timestamp::parse(input).is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_bounds() {
        assert!(Timestamp::max() > Timestamp::zero());
        assert_eq!(Timestamp::zero(), Timestamp::zero());
        assert!(Timestamp::since(5) < Timestamp::new(5, 0, node("1")));
        assert!(Timestamp::since(6) > Timestamp::new(5, MAX_COUNTER, node("1")));
    }

    #[test]
    fn test_order_tie_breaks_on_node() {
        let a = Timestamp::new(100, 3, node("A"));
        let b = Timestamp::new(100, 3, node("B"));
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn test_serde_as_string() {
        let ts = Timestamp::new(1_429_914_222_123, 0x1000, node("0123456789ABCDEF"));
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2015-04-24T22:23:42.123Z-1000-0123456789ABCDEF\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
        assert!(serde_json::from_str::<Timestamp>("\"garbage\"").is_err());
    }
}
