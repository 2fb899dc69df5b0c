//! Plain snapshot data.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

/// A host-transmittable value: primitives, ordered sequences, ordered mappings.
///
/// Snapshots compare structurally (`PartialEq`), never by identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PlainValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<PlainValue>),
    Object(IndexMap<String, PlainValue>),
}

/// Coarse kind used by the diff engine to detect kind changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Undefined,
    Null,
    Primitive,
    Sequence,
    Mapping,
}

impl PlainValue {
    /// An empty mapping.
    pub fn object() -> Self {
        Self::Object(IndexMap::new())
    }

    pub fn kind(&self) -> Kind {
        match self {
            Self::Undefined => Kind::Undefined,
            Self::Null => Kind::Null,
            Self::Bool(_) | Self::Number(_) | Self::String(_) => Kind::Primitive,
            Self::Array(_) => Kind::Sequence,
            Self::Object(_) => Kind::Mapping,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, PlainValue>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PlainValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Member lookup for mappings. Anything else yields `None`.
    pub fn get(&self, key: &str) -> Option<&PlainValue> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Wire form. `Undefined` and non-finite numbers become `null`; integral
    /// numbers go out as integers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

/// Largest integer an f64 holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::Number(serde_json::Number::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl From<serde_json::Value> for PlainValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&PlainValue> for serde_json::Value {
    fn from(value: &PlainValue) -> Self {
        value.to_json()
    }
}

impl Serialize for PlainValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
