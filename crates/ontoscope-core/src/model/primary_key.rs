// ── Core identity types ──
//
// PrimaryKey and ObjectRef identify a single ontology object. Every
// object cache key is minted from an (object type, primary key) pair.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── PrimaryKey ──────────────────────────────────────────────────────

/// Primary key of an ontology object.
///
/// Object types use either integer or string primary keys. Both forms
/// hash and compare structurally so they can participate in cache key
/// interning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Integer(i64),
    String(String),
}

impl PrimaryKey {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Integer(_) => None,
        }
    }

    /// JSON form used when matching `$primaryKey` filters.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::String(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for PrimaryKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<i64> for PrimaryKey {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for PrimaryKey {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<String> for PrimaryKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for PrimaryKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

// ── ObjectRef ───────────────────────────────────────────────────────

/// Reference to an object by type and primary key, without its data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub object_type: String,
    pub primary_key: PrimaryKey,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, primary_key: impl Into<PrimaryKey>) -> Self {
        Self {
            object_type: object_type.into(),
            primary_key: primary_key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.primary_key)
    }
}
