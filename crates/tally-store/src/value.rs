//! Cell values and their wire encoding.
//!
//! Values travel as tagged strings: `0:` for null, `N:<number>` for a
//! number and `S:<text>` for a string. Decoding is strict; anything else is
//! rejected rather than guessed at.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tally_hlc::CodecError;

/// A cell value.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Encode as a tagged wire string.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode a tagged wire string.
    pub fn decode(s: &str) -> Result<Self, CodecError> {
        let invalid = || CodecError::InvalidValue(s.to_string());
        let (tag, body) = s.split_once(':').ok_or_else(invalid)?;
        match tag {
            "0" if body.is_empty() => Ok(Value::Null),
            "N" => {
                let n: f64 = body.parse().map_err(|_| invalid())?;
                if !n.is_finite() {
                    return Err(invalid());
                }
                Ok(Value::Number(n))
            }
            "S" => Ok(Value::String(body.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "0:"),
            Value::Number(n) => write!(f, "N:{}", n),
            Value::String(s) => write!(f, "S:{}", s),
        }
    }
}

impl FromStr for Value {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Value::decode(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Value::decode(&s).map_err(serde::de::Error::custom)
    }
}
