//! Write tasks
//!
//! A task is a transient, environment-agnostic description of one document
//! mutation. Tasks are built by the collection API, optionally shipped around
//! as JSON records, and consumed once by the batch runner.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LiftError, LiftResult};
use crate::value::{PathMarker, WriteValue};

/// Kind of change reported to the write observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Update,
    Delete,
    Other,
}

/// One pending document mutation
#[derive(Debug, Clone, PartialEq)]
pub enum WriteTask {
    /// Upsert; merged onto any existing document
    Add {
        collection: String,
        id: String,
        doc: WriteValue,
    },
    /// Full overwrite
    Set {
        collection: String,
        id: String,
        doc: WriteValue,
    },
    /// Recursive deep merge
    Update {
        collection: String,
        id: String,
        doc: WriteValue,
    },
    /// Replaces the given top-level fields only
    UpdateShallow {
        collection: String,
        id: String,
        doc: WriteValue,
    },
    /// Destructive write of the single path selected by `path`
    SetPath {
        collection: String,
        id: String,
        path: PathMarker,
        value: WriteValue,
    },
    Delete {
        collection: String,
        id: String,
    },
    /// No-op, returned by writes that did nothing
    Empty,
}

impl WriteTask {
    pub fn type_name(&self) -> &'static str {
        match self {
            WriteTask::Add { .. } => "add",
            WriteTask::Set { .. } => "set",
            WriteTask::Update { .. } => "update",
            WriteTask::UpdateShallow { .. } => "updateShallow",
            WriteTask::SetPath { .. } => "setPath",
            WriteTask::Delete { .. } => "delete",
            WriteTask::Empty => "empty",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, WriteTask::Empty)
    }

    pub fn collection(&self) -> Option<&str> {
        match self {
            WriteTask::Add { collection, .. }
            | WriteTask::Set { collection, .. }
            | WriteTask::Update { collection, .. }
            | WriteTask::UpdateShallow { collection, .. }
            | WriteTask::SetPath { collection, .. }
            | WriteTask::Delete { collection, .. } => Some(collection.as_str()),
            WriteTask::Empty => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            WriteTask::Add { id, .. }
            | WriteTask::Set { id, .. }
            | WriteTask::Update { id, .. }
            | WriteTask::UpdateShallow { id, .. }
            | WriteTask::SetPath { id, .. }
            | WriteTask::Delete { id, .. } => Some(id.as_str()),
            WriteTask::Empty => None,
        }
    }

    /// What the write observer is told about this task
    pub fn change_kind(&self) -> Option<ChangeKind> {
        match self {
            WriteTask::Update { .. } | WriteTask::UpdateShallow { .. } | WriteTask::SetPath { .. } => {
                Some(ChangeKind::Update)
            }
            WriteTask::Delete { .. } => Some(ChangeKind::Delete),
            WriteTask::Add { .. } | WriteTask::Set { .. } => Some(ChangeKind::Other),
            WriteTask::Empty => None,
        }
    }

    /// Fails if the task writes one of the `protected` root properties.
    ///
    /// Only update, updateShallow and setPath are checked; add and set
    /// replace whole documents and are governed by the caller.
    pub fn check_protected_roots(&self, protected: &[String]) -> LiftResult<()> {
        if protected.is_empty() {
            return Ok(());
        }

        let (collection, touched): (&str, Vec<&str>) = match self {
            WriteTask::Update { collection, doc, .. }
            | WriteTask::UpdateShallow { collection, doc, .. } => (
                collection.as_str(),
                doc.as_object()
                    .map(|m| m.keys().map(String::as_str).collect())
                    .unwrap_or_default(),
            ),
            WriteTask::SetPath {
                collection, path, ..
            } => (collection.as_str(), path.root_keys()),
            _ => return Ok(()),
        };

        match touched.into_iter().find(|k| protected.iter().any(|p| p == k)) {
            Some(field) => Err(LiftError::RestrictedField {
                collection: collection.to_string(),
                field: field.to_string(),
                operation: self.type_name(),
            }),
            None => Ok(()),
        }
    }

    /// Decodes a task record such as
    /// `{"type": "update", "collection": "person", "id": "p1", "doc": {...}}`.
    ///
    /// Sentinels in `doc` and `value` use the `{"$sentinel": "delete"}` form.
    pub fn from_json(record: Value) -> LiftResult<Self> {
        let record: TaskRecord = serde_json::from_value(record)
            .map_err(|e| LiftError::InvalidPayload(format!("malformed write task: {}", e)))?;

        let collection = record.collection;
        let id = record.id;
        let payload = |v: Option<Value>| WriteValue::from_tagged_json(v.unwrap_or(Value::Null));

        Ok(match record.kind.as_str() {
            "add" => WriteTask::Add {
                collection,
                id,
                doc: payload(record.doc)?,
            },
            "set" => WriteTask::Set {
                collection,
                id,
                doc: payload(record.doc)?,
            },
            "update" => WriteTask::Update {
                collection,
                id,
                doc: payload(record.doc)?,
            },
            "updateShallow" => WriteTask::UpdateShallow {
                collection,
                id,
                doc: payload(record.doc)?,
            },
            "setPath" => WriteTask::SetPath {
                collection,
                id,
                path: PathMarker::new(record.path_obj.unwrap_or(Value::Null)),
                value: payload(record.value)?,
            },
            "delete" => WriteTask::Delete { collection, id },
            "empty" => WriteTask::Empty,
            other => return Err(LiftError::UnknownTaskType(other.to_string())),
        })
    }

    /// Encodes the task in the record form read by [`WriteTask::from_json`]
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".to_string(), Value::from(self.type_name()));
        if let Some(c) = self.collection() {
            out.insert("collection".to_string(), Value::from(c));
        }
        if let Some(id) = self.id() {
            out.insert("id".to_string(), Value::from(id));
        }
        match self {
            WriteTask::Add { doc, .. }
            | WriteTask::Set { doc, .. }
            | WriteTask::Update { doc, .. }
            | WriteTask::UpdateShallow { doc, .. } => {
                out.insert("doc".to_string(), doc.to_tagged_json());
            }
            WriteTask::SetPath { path, value, .. } => {
                out.insert("pathObj".to_string(), path.as_value().clone());
                out.insert("value".to_string(), value.to_tagged_json());
            }
            WriteTask::Delete { .. } | WriteTask::Empty => {}
        }
        Value::Object(out)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    collection: String,
    #[serde(default)]
    id: String,
    doc: Option<Value>,
    path_obj: Option<Value>,
    value: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Sentinel;
    use serde_json::json;

    #[test]
    fn test_change_kinds() {
        let update = WriteTask::Update {
            collection: "person".into(),
            id: "p1".into(),
            doc: WriteValue::object(),
        };
        let delete = WriteTask::Delete {
            collection: "person".into(),
            id: "p1".into(),
        };
        let add = WriteTask::Add {
            collection: "person".into(),
            id: "p1".into(),
            doc: WriteValue::object(),
        };
        assert_eq!(update.change_kind(), Some(ChangeKind::Update));
        assert_eq!(delete.change_kind(), Some(ChangeKind::Delete));
        assert_eq!(add.change_kind(), Some(ChangeKind::Other));
        assert_eq!(WriteTask::Empty.change_kind(), None);
    }

    #[test]
    fn test_from_json() {
        let task = WriteTask::from_json(json!({
            "type": "update",
            "collection": "person",
            "id": "p1",
            "doc": {"age": {"$sentinel": "increment"}}
        }))
        .unwrap();

        match task {
            WriteTask::Update { id, doc, .. } => {
                assert_eq!(id, "p1");
                assert_eq!(doc.get("age"), Some(&WriteValue::Sentinel(Sentinel::Increment)));
            }
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[test]
    fn test_from_json_unknown_type() {
        let err = WriteTask::from_json(json!({"type": "upsert", "collection": "person", "id": "p1"}))
            .unwrap_err();
        assert!(matches!(err, LiftError::UnknownTaskType(ref t) if t == "upsert"));
    }

    #[test]
    fn test_json_record_round_trip() {
        let task = WriteTask::SetPath {
            collection: "person".into(),
            id: "p1".into(),
            path: PathMarker::field("favFoods"),
            value: WriteValue::from(json!({"favFoods": {"italian": "pizza"}})),
        };
        assert_eq!(WriteTask::from_json(task.to_json()).unwrap(), task);
    }

    #[test]
    fn test_protected_roots() {
        let protected = vec!["billing".to_string()];

        let update = WriteTask::Update {
            collection: "account".into(),
            id: "a1".into(),
            doc: WriteValue::object().with("billing", WriteValue::object().with("plan", "pro")),
        };
        assert!(matches!(
            update.check_protected_roots(&protected),
            Err(LiftError::RestrictedField { operation: "update", .. })
        ));

        let set_path = WriteTask::SetPath {
            collection: "account".into(),
            id: "a1".into(),
            path: PathMarker::field("billing.plan"),
            value: WriteValue::object(),
        };
        assert!(set_path.check_protected_roots(&protected).is_err());

        let set = WriteTask::Set {
            collection: "account".into(),
            id: "a1".into(),
            doc: WriteValue::object().with("billing", "x"),
        };
        assert!(set.check_protected_roots(&protected).is_ok());
    }
}
