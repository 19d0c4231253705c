//! # Write Values
//!
//! The payload tree carried by write tasks. Sentinels are a variant of the
//! tree itself, so a real string value can never be mistaken for a field
//! operator.

pub mod path;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{LiftError, LiftResult};

pub use path::{resolve_path, PathMarker};

/// Key of the single-entry object that carries a sentinel in JSON task
/// records, e.g. `{"$sentinel": "delete"}`
pub const SENTINEL_KEY: &str = "$sentinel";

/// In-band markers that request a store field operator instead of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Sentinel {
    /// Remove the field
    Delete,
    /// Atomically add one to a numeric field
    Increment,
    /// Write the server's commit time
    ServerTimestamp,
}

impl Sentinel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentinel::Delete => "delete",
            Sentinel::Increment => "increment",
            Sentinel::ServerTimestamp => "serverTimestamp",
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A document body or partial update, possibly containing sentinels
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WriteValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<WriteValue>),
    Object(BTreeMap<String, WriteValue>),
    Sentinel(Sentinel),
}

impl WriteValue {
    /// An empty object
    pub fn object() -> Self {
        WriteValue::Object(BTreeMap::new())
    }

    /// Serializes a model into a write payload
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> LiftResult<Self> {
        Ok(WriteValue::from(serde_json::to_value(value)?))
    }

    /// Builder form of [`WriteValue::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<WriteValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a field, turning a non-object value into an object first
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<WriteValue>) {
        if !self.is_object() {
            *self = WriteValue::object();
        }
        if let WriteValue::Object(map) = self {
            map.insert(key.into(), value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&WriteValue> {
        match self {
            WriteValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, WriteValue>> {
        match self {
            WriteValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WriteValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, WriteValue::Object(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, WriteValue::Null)
    }

    /// Returns true if a sentinel appears anywhere in the tree
    pub fn contains_sentinel(&self) -> bool {
        match self {
            WriteValue::Sentinel(_) => true,
            WriteValue::Array(items) => items.iter().any(WriteValue::contains_sentinel),
            WriteValue::Object(map) => map.values().any(WriteValue::contains_sentinel),
            _ => false,
        }
    }

    /// Converts to plain JSON. Fails if the tree holds a sentinel.
    pub fn to_json(&self) -> LiftResult<Value> {
        Ok(match self {
            WriteValue::Null => Value::Null,
            WriteValue::Bool(b) => Value::Bool(*b),
            WriteValue::Number(n) => Value::Number(n.clone()),
            WriteValue::String(s) => Value::String(s.clone()),
            WriteValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(WriteValue::to_json)
                    .collect::<LiftResult<Vec<_>>>()?,
            ),
            WriteValue::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                Value::Object(out)
            }
            WriteValue::Sentinel(s) => {
                return Err(LiftError::InvalidPayload(format!(
                    "sentinel {} has no plain JSON form",
                    s
                )))
            }
        })
    }

    /// Decodes JSON in which sentinels are tagged with [`SENTINEL_KEY`]
    pub fn from_tagged_json(value: Value) -> LiftResult<Self> {
        Ok(match value {
            Value::Object(map) if map.len() == 1 && map.contains_key(SENTINEL_KEY) => {
                let tag = map.get(SENTINEL_KEY).cloned().unwrap_or(Value::Null);
                let sentinel: Sentinel = serde_json::from_value(tag.clone()).map_err(|_| {
                    LiftError::InvalidPayload(format!("unknown sentinel {}", tag))
                })?;
                WriteValue::Sentinel(sentinel)
            }
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k, WriteValue::from_tagged_json(v)?);
                }
                WriteValue::Object(out)
            }
            Value::Array(items) => WriteValue::Array(
                items
                    .into_iter()
                    .map(WriteValue::from_tagged_json)
                    .collect::<LiftResult<Vec<_>>>()?,
            ),
            other => WriteValue::from(other),
        })
    }

    /// Inverse of [`WriteValue::from_tagged_json`]
    pub fn to_tagged_json(&self) -> Value {
        match self {
            WriteValue::Null => Value::Null,
            WriteValue::Bool(b) => Value::Bool(*b),
            WriteValue::Number(n) => Value::Number(n.clone()),
            WriteValue::String(s) => Value::String(s.clone()),
            WriteValue::Array(items) => {
                Value::Array(items.iter().map(WriteValue::to_tagged_json).collect())
            }
            WriteValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_tagged_json()))
                    .collect(),
            ),
            WriteValue::Sentinel(s) => {
                let mut tag = serde_json::Map::new();
                tag.insert(SENTINEL_KEY.to_string(), Value::String(s.as_str().to_string()));
                Value::Object(tag)
            }
        }
    }
}

impl From<Value> for WriteValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => WriteValue::Null,
            Value::Bool(b) => WriteValue::Bool(b),
            Value::Number(n) => WriteValue::Number(n),
            Value::String(s) => WriteValue::String(s),
            Value::Array(items) => WriteValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                WriteValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<Sentinel> for WriteValue {
    fn from(s: Sentinel) -> Self {
        WriteValue::Sentinel(s)
    }
}

impl From<&str> for WriteValue {
    fn from(s: &str) -> Self {
        WriteValue::String(s.to_string())
    }
}

impl From<String> for WriteValue {
    fn from(s: String) -> Self {
        WriteValue::String(s)
    }
}

impl From<bool> for WriteValue {
    fn from(b: bool) -> Self {
        WriteValue::Bool(b)
    }
}

impl From<i64> for WriteValue {
    fn from(n: i64) -> Self {
        WriteValue::Number(n.into())
    }
}

impl From<f64> for WriteValue {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(WriteValue::Null, WriteValue::Number)
    }
}

/// A dotted path into a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Parses `a.b.c`
    pub fn parse(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Root property name
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Reads the value at this path from a JSON document
    pub fn get<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(doc, |acc, seg| acc.get(seg))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        FieldPath::parse(s)
    }
}
