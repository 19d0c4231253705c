//! Payload scrubbing
//!
//! Turns a [`WriteValue`] tree into store field writes: sentinels become
//! field operators, nulls are dropped instead of written, and nested objects
//! are recursed into. With `remove_empty_objects`, a nested object left empty
//! after scrubbing is dropped so that a merge write does not truncate the
//! existing subtree.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{LiftError, LiftResult};
use crate::store::{FieldMap, FieldWrite};
use crate::value::{Sentinel, WriteValue};

/// Payloads nested deeper than this are rejected
pub const MAX_SCRUB_DEPTH: usize = 64;

/// Scrubs a document body. The payload must be an object.
pub fn scrub_document(doc: &WriteValue, remove_empty_objects: bool) -> LiftResult<FieldMap> {
    match doc {
        WriteValue::Object(map) => scrub_map(map, remove_empty_objects, 0),
        other => Err(LiftError::InvalidPayload(format!(
            "document payload must be an object, got {}",
            kind_of(other)
        ))),
    }
}

/// Scrubs a single value written at a path.
///
/// Unlike fields inside a document, a top-level null is written as null and
/// a top-level empty object is kept.
pub fn scrub_value(value: &WriteValue, remove_empty_objects: bool) -> LiftResult<FieldWrite> {
    match value {
        WriteValue::Object(map) => Ok(FieldWrite::Map(scrub_map(map, remove_empty_objects, 0)?)),
        other => Ok(scrub_field(other, remove_empty_objects, 0)?
            .unwrap_or(FieldWrite::Value(Value::Null))),
    }
}

fn scrub_map(
    map: &BTreeMap<String, WriteValue>,
    remove_empty_objects: bool,
    depth: usize,
) -> LiftResult<FieldMap> {
    if depth > MAX_SCRUB_DEPTH {
        return Err(LiftError::InvalidPayload(format!(
            "payload nested deeper than {} levels",
            MAX_SCRUB_DEPTH
        )));
    }

    let mut out = FieldMap::new();
    for (key, value) in map {
        if let Some(field) = scrub_field(value, remove_empty_objects, depth)? {
            out.insert(key.clone(), field);
        }
    }
    Ok(out)
}

/// `None` means the field is left out of the write
fn scrub_field(
    value: &WriteValue,
    remove_empty_objects: bool,
    depth: usize,
) -> LiftResult<Option<FieldWrite>> {
    Ok(match value {
        WriteValue::Null => None,
        WriteValue::Sentinel(Sentinel::Delete) => Some(FieldWrite::Delete),
        WriteValue::Sentinel(Sentinel::Increment) => Some(FieldWrite::Increment(1)),
        WriteValue::Sentinel(Sentinel::ServerTimestamp) => Some(FieldWrite::ServerTimestamp),
        WriteValue::Object(map) => {
            let inner = scrub_map(map, remove_empty_objects, depth + 1)?;
            if remove_empty_objects && inner.is_empty() {
                None
            } else {
                Some(FieldWrite::Map(inner))
            }
        }
        WriteValue::Array(items) => {
            if items.iter().any(WriteValue::contains_sentinel) {
                return Err(LiftError::InvalidPayload(
                    "field operators are not supported inside arrays".to_string(),
                ));
            }
            Some(FieldWrite::Value(value.to_json()?))
        }
        scalar => Some(FieldWrite::Value(scalar.to_json()?)),
    })
}

fn kind_of(value: &WriteValue) -> &'static str {
    match value {
        WriteValue::Null => "null",
        WriteValue::Bool(_) => "bool",
        WriteValue::Number(_) => "number",
        WriteValue::String(_) => "string",
        WriteValue::Array(_) => "array",
        WriteValue::Object(_) => "object",
        WriteValue::Sentinel(_) => "sentinel",
    }
}
