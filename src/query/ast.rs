//! Query description
//!
//! `SimpleQuery` is the declarative, serializable form of a query. Its
//! canonical JSON encoding is also what identifies a live query subscription.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LiftError, LiftResult};
use crate::store::{Direction, WhereOp};
use crate::value::{FieldPath, PathMarker};

/// A single where predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Where {
    pub path: FieldPath,
    pub op: WhereOp,
    pub value: Value,
}

impl Where {
    pub fn new(path: &str, op: WhereOp, value: impl Into<Value>) -> Self {
        Self {
            path: FieldPath::parse(path),
            op,
            value: value.into(),
        }
    }

    /// Parses the mirror-object form, one predicate per leaf:
    /// `{"favFoods": {"american": ["==", "burger"]}, "age": [">", 3]}`
    pub fn from_nested(nested: &Value) -> LiftResult<Vec<Where>> {
        let mut out = Vec::new();
        collect_nested(nested, &mut Vec::new(), &mut out)?;
        Ok(out)
    }
}

fn collect_nested(node: &Value, prefix: &mut Vec<String>, out: &mut Vec<Where>) -> LiftResult<()> {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                prefix.push(key.clone());
                collect_nested(child, prefix, out)?;
                prefix.pop();
            }
            Ok(())
        }
        Value::Array(pair) if pair.len() == 2 && !prefix.is_empty() => {
            let op = pair[0]
                .as_str()
                .and_then(WhereOp::parse)
                .ok_or_else(|| {
                    LiftError::InvalidQuery(format!(
                        "unknown where operator {} at {}",
                        pair[0],
                        prefix.join(".")
                    ))
                })?;
            out.push(Where {
                path: FieldPath::new(prefix.clone()),
                op,
                value: pair[1].clone(),
            });
            Ok(())
        }
        other => Err(LiftError::InvalidQuery(format!(
            "expected [operator, value] at {}, got {}",
            prefix.join("."),
            other
        ))),
    }
}

/// Sort clause; the field is selected with a path marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    #[serde(rename = "pathObj")]
    pub field: PathMarker,
    #[serde(default)]
    pub dir: Direction,
}

/// Declarative query over one collection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(default, rename = "where", skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Where>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,

    #[serde(default, rename = "startAtValue", skip_serializing_if = "Option::is_none")]
    pub start_at: Option<Vec<Value>>,

    #[serde(default, rename = "startAfterValue", skip_serializing_if = "Option::is_none")]
    pub start_after: Option<Vec<Value>>,

    #[serde(default, rename = "endAtValue", skip_serializing_if = "Option::is_none")]
    pub end_at: Option<Vec<Value>>,

    #[serde(default, rename = "endBeforeValue", skip_serializing_if = "Option::is_none")]
    pub end_before: Option<Vec<Value>>,

    /// Pagination anchor. When set, the query resumes strictly after this
    /// document and the declared start cursors are ignored.
    #[serde(
        default,
        rename = "_internalStartAfterDocId",
        skip_serializing_if = "Option::is_none"
    )]
    pub continuation_id: Option<String>,
}

impl SimpleQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filter(mut self, path: &str, op: WhereOp, value: impl Into<Value>) -> Self {
        self.filters.push(Where::new(path, op, value));
        self
    }

    /// Appends predicates given in mirror-object form
    pub fn filter_nested(mut self, nested: &Value) -> LiftResult<Self> {
        self.filters.extend(Where::from_nested(nested)?);
        Ok(self)
    }

    pub fn order_by(mut self, path: &str, dir: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: PathMarker::field(path),
            dir,
        });
        self
    }

    pub fn start_at(mut self, values: Vec<Value>) -> Self {
        self.start_at = Some(values);
        self
    }

    pub fn start_after(mut self, values: Vec<Value>) -> Self {
        self.start_after = Some(values);
        self
    }

    pub fn end_at(mut self, values: Vec<Value>) -> Self {
        self.end_at = Some(values);
        self
    }

    pub fn end_before(mut self, values: Vec<Value>) -> Self {
        self.end_before = Some(values);
        self
    }

    /// Canonical JSON form. Object keys inside values are sorted, so equal
    /// queries always encode identically.
    pub fn canonical_json(&self) -> LiftResult<String> {
        serde_json::to_string(self).map_err(|e| LiftError::InvalidQuery(e.to_string()))
    }
}
