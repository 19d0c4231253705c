//! Path markers
//!
//! A marker mirrors the shape of a document with exactly one leaf set to
//! `true`, e.g. `{"favFoods": {"italian": true}}` addresses `favFoods.italian`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{FieldPath, WriteValue};
use crate::error::{LiftError, LiftResult};

/// Markers deeper than this are rejected
const MAX_MARKER_DEPTH: usize = 32;

/// Sparse mirror object selecting a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathMarker(Value);

impl PathMarker {
    pub fn new(marker: Value) -> Self {
        Self(marker)
    }

    /// Builds the marker for a dotted path
    pub fn field(dotted: &str) -> Self {
        let path = FieldPath::parse(dotted);
        let marker = path
            .segments()
            .iter()
            .rev()
            .fold(Value::Bool(true), |inner, seg| {
                let mut map = Map::new();
                map.insert(seg.clone(), inner);
                Value::Object(map)
            });
        Self(marker)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Returns the root property names the marker touches
    pub fn root_keys(&self) -> Vec<&str> {
        match &self.0 {
            Value::Object(map) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Dotted path of the single marked leaf
    pub fn path(&self) -> LiftResult<FieldPath> {
        let mut found = Vec::new();
        collect_marked(&self.0, &mut Vec::new(), &mut found, 0)?;

        match found.len() {
            1 => Ok(FieldPath::new(found.remove(0))),
            0 => Err(LiftError::MissingPathValue(format!(
                "marker {} selects no field",
                self.0
            ))),
            n => Err(LiftError::MissingPathValue(format!(
                "marker {} selects {} fields, expected exactly one",
                self.0, n
            ))),
        }
    }
}

fn collect_marked(
    node: &Value,
    prefix: &mut Vec<String>,
    found: &mut Vec<Vec<String>>,
    depth: usize,
) -> LiftResult<()> {
    if depth > MAX_MARKER_DEPTH {
        return Err(LiftError::MissingPathValue(format!(
            "marker deeper than {} levels",
            MAX_MARKER_DEPTH
        )));
    }
    match node {
        Value::Bool(true) if !prefix.is_empty() => found.push(prefix.clone()),
        Value::Object(map) => {
            for (key, child) in map {
                prefix.push(key.clone());
                collect_marked(child, prefix, found, depth + 1)?;
                prefix.pop();
            }
        }
        _ => {}
    }
    Ok(())
}

/// Resolves a marker against a source payload.
///
/// Returns the dotted path and the value found by walking `source` along it.
pub fn resolve_path(marker: &PathMarker, source: &WriteValue) -> LiftResult<(FieldPath, WriteValue)> {
    let path = marker.path()?;

    let mut cursor = source;
    for seg in path.segments() {
        cursor = cursor.get(seg).ok_or_else(|| {
            LiftError::MissingPathValue(format!("no value at {} in path write payload", path))
        })?;
    }

    Ok((path, cursor.clone()))
}
