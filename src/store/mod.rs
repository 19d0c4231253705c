//! # Document Store Boundary
//!
//! The primitives the lift consumes from a document store driver: point
//! reads, query execution, atomic write batches, caller-owned transactions
//! and push listeners with snapshot metadata.
//!
//! [`MemoryStore`] is a complete in-process implementation used by the test
//! suite and for local development.

pub mod errors;
pub mod eval;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::FieldPath;

pub use errors::{StoreError, StoreResult};
pub use memory::{MemoryBatch, MemoryStore};

/// Stored document body
pub type Document = serde_json::Map<String, Value>;

/// Address of one document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A store-native field write
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    /// Plain value
    Value(Value),
    /// Nested fields. Merge writes recurse into it; other writes replace.
    Map(FieldMap),
    /// Remove the field
    Delete,
    /// Add to a numeric field
    Increment(i64),
    /// Commit time in epoch millis
    ServerTimestamp,
}

/// Top-level fields of a write
pub type FieldMap = BTreeMap<String, FieldWrite>;

/// How a set is applied to an existing document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Replace the whole document
    Overwrite,
    /// Deep merge into the existing document
    Merge,
}

/// Anything writes can be staged into: a batch or a transaction
pub trait WriteStager: Send {
    fn set(&mut self, target: &DocRef, data: FieldMap, mode: SetMode);

    /// Field-path update; fails at commit if the document does not exist
    fn update(&mut self, target: &DocRef, fields: Vec<(FieldPath, FieldWrite)>);

    fn delete(&mut self, target: &DocRef);
}

/// An atomic multi-document write
#[async_trait]
pub trait WriteBatch: WriteStager {
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Where a snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Served from the local cache
    pub from_cache: bool,
    /// Reflects local writes not yet acknowledged
    pub has_pending_writes: bool,
}

impl SnapshotMetadata {
    /// A server-confirmed snapshot
    pub fn server() -> Self {
        Self::default()
    }

    /// True for cache-only snapshots with nothing local pending
    pub fn is_stale_cache(&self) -> bool {
        self.from_cache && !self.has_pending_writes
    }
}

/// One document as read from the store
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    /// `None` when the document does not exist
    pub data: Option<Document>,
}

impl DocumentSnapshot {
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn missing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: None,
        }
    }

    /// The document as a JSON object (`null` when missing)
    pub fn to_value(&self) -> Value {
        self.data
            .as_ref()
            .map_or(Value::Null, |d| Value::Object(d.clone()))
    }
}

/// Kind of change reported by a query listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

/// One entry of a query listener's change list
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub change_type: ChangeType,
    pub doc: DocumentSnapshot,
}

/// Push notification for a document listener
#[derive(Debug, Clone)]
pub struct DocumentEvent {
    pub snapshot: DocumentSnapshot,
    pub metadata: SnapshotMetadata,
}

/// Push notification for a query listener
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub docs: Vec<DocumentSnapshot>,
    pub changes: Vec<DocumentChange>,
    pub metadata: SnapshotMetadata,
}

pub type DocumentListener = Arc<dyn Fn(StoreResult<DocumentEvent>) + Send + Sync>;
pub type QueryListener = Arc<dyn Fn(StoreResult<QueryEvent>) + Send + Sync>;

/// Owned teardown for a provider listener.
///
/// Released exactly once, either explicitly or on drop.
pub struct ListenerHandle {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(mut self) {
        if let Some(f) = self.release.take() {
            f();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(f) = self.release.take() {
            f();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Comparison operator of a where predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WhereOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "in")]
    In,
}

impl WhereOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "<" => Some(WhereOp::Lt),
            "<=" => Some(WhereOp::Lte),
            "==" => Some(WhereOp::Eq),
            ">=" => Some(WhereOp::Gte),
            ">" => Some(WhereOp::Gt),
            "in" => Some(WhereOp::In),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WhereOp::Lt => "<",
            WhereOp::Lte => "<=",
            WhereOp::Eq => "==",
            WhereOp::Gte => ">=",
            WhereOp::Gt => ">",
            WhereOp::In => "in",
        }
    }

    pub fn is_inequality(&self) -> bool {
        matches!(self, WhereOp::Lt | WhereOp::Lte | WhereOp::Gt | WhereOp::Gte)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// A where predicate in store form
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub path: FieldPath,
    pub op: WhereOp,
    pub value: Value,
}

/// Lower query bound
#[derive(Debug, Clone, PartialEq)]
pub enum StartBound {
    At(Vec<Value>),
    After(Vec<Value>),
    /// Strictly after this document in query order
    AfterDocument(DocumentSnapshot),
}

/// Upper query bound
#[derive(Debug, Clone, PartialEq)]
pub enum EndBound {
    At(Vec<Value>),
    Before(Vec<Value>),
}

/// A store-native query over one collection
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQuery {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Vec<(FieldPath, Direction)>,
    pub limit: Option<usize>,
    pub start: Option<StartBound>,
    pub end: Option<EndBound>,
}

impl StoreQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            start: None,
            end: None,
        }
    }

    pub fn filter(mut self, path: FieldPath, op: WhereOp, value: Value) -> Self {
        self.filters.push(FieldFilter { path, op, value });
        self
    }

    pub fn order_by(mut self, path: FieldPath, dir: Direction) -> Self {
        self.order_by.push((path, dir));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start(mut self, bound: StartBound) -> Self {
        self.start = Some(bound);
        self
    }

    pub fn end(mut self, bound: EndBound) -> Self {
        self.end = Some(bound);
        self
    }
}

/// Driver interface of the underlying document store
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn get(&self, target: &DocRef) -> StoreResult<DocumentSnapshot>;

    async fn run_query(&self, query: &StoreQuery) -> StoreResult<Vec<DocumentSnapshot>>;

    /// Starts an empty atomic batch
    fn batch(&self) -> Box<dyn WriteBatch>;

    fn listen_document(
        &self,
        target: &DocRef,
        listener: DocumentListener,
    ) -> StoreResult<ListenerHandle>;

    fn listen_query(&self, query: &StoreQuery, listener: QueryListener)
        -> StoreResult<ListenerHandle>;

    /// Allocates an id for a new document
    fn new_document_id(&self) -> String {
        crate::id::push_id()
    }
}
