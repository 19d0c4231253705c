//! In-memory document store
//!
//! Applies batches atomically against a copy of the data, then notifies
//! document and query listeners whose view changed. Listeners are always
//! invoked with no internal lock held, so they may call back into the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Number, Value};
use uuid::Uuid;

use super::eval;
use super::{
    ChangeType, DocRef, Document, DocumentChange, DocumentEvent, DocumentListener,
    DocumentSnapshot, DocumentStore, FieldMap, FieldWrite, ListenerHandle, QueryEvent,
    QueryListener, SetMode, SnapshotMetadata, StoreError, StoreQuery, StoreResult, WriteBatch,
    WriteStager,
};
use crate::value::FieldPath;

type Collections = BTreeMap<String, BTreeMap<String, Document>>;

struct DocWatch {
    target: DocRef,
    listener: DocumentListener,
    last: Option<Document>,
}

struct QueryWatch {
    query: StoreQuery,
    listener: QueryListener,
    last: Vec<DocumentSnapshot>,
}

#[derive(Default)]
struct State {
    collections: Collections,
    doc_watches: HashMap<Uuid, DocWatch>,
    query_watches: HashMap<Uuid, QueryWatch>,
    fail_next_commit: Option<StoreError>,
    fail_next_read: Option<StoreError>,
    commits: u64,
}

enum Notify {
    Doc(DocumentListener, StoreResult<DocumentEvent>),
    Query(QueryListener, StoreResult<QueryEvent>),
}

impl Notify {
    fn fire(self) {
        match self {
            Notify::Doc(listener, event) => listener(event),
            Notify::Query(listener, event) => listener(event),
        }
    }
}

/// Shared in-memory store. Clones refer to the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Current body of a document, bypassing listeners
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned()
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.lock().collections.get(collection).map_or(0, BTreeMap::len)
    }

    /// Number of open provider listeners (document + query)
    pub fn listener_count(&self) -> usize {
        let state = self.lock();
        state.doc_watches.len() + state.query_watches.len()
    }

    /// Number of successfully committed batches
    pub fn commit_count(&self) -> u64 {
        self.lock().commits
    }

    /// Makes the next commit fail with `error` without applying anything
    pub fn fail_next_commit(&self, error: StoreError) {
        self.lock().fail_next_commit = Some(error);
    }

    /// Makes the next `get` or `run_query` fail with `error`
    pub fn fail_next_read(&self, error: StoreError) {
        self.lock().fail_next_read = Some(error);
    }

    /// Starts a caller-owned transaction. Nothing is written until
    /// [`MemoryBatch::commit_now`] is called.
    pub fn transaction(&self) -> MemoryBatch {
        MemoryBatch {
            store: self.clone(),
            writes: Vec::new(),
        }
    }

    /// Re-delivers the current state of every listener with no changes and
    /// the given metadata, the way a remote store emits periodic or
    /// cache-sourced snapshots.
    pub fn emit_heartbeat(&self, metadata: SnapshotMetadata) {
        let notes = {
            let state = self.lock();
            let mut notes = Vec::new();
            for watch in state.doc_watches.values() {
                let snapshot = DocumentSnapshot {
                    id: watch.target.id.clone(),
                    data: watch.last.clone(),
                };
                notes.push(Notify::Doc(
                    Arc::clone(&watch.listener),
                    Ok(DocumentEvent { snapshot, metadata }),
                ));
            }
            for watch in state.query_watches.values() {
                notes.push(Notify::Query(
                    Arc::clone(&watch.listener),
                    Ok(QueryEvent {
                        docs: watch.last.clone(),
                        changes: Vec::new(),
                        metadata,
                    }),
                ));
            }
            notes
        };
        notes.into_iter().for_each(Notify::fire);
    }

    /// Delivers `error` to every listener on `collection`
    pub fn fail_listeners(&self, collection: &str, error: StoreError) {
        let notes = {
            let state = self.lock();
            let mut notes = Vec::new();
            for watch in state.doc_watches.values() {
                if watch.target.collection == collection {
                    notes.push(Notify::Doc(Arc::clone(&watch.listener), Err(error.clone())));
                }
            }
            for watch in state.query_watches.values() {
                if watch.query.collection == collection {
                    notes.push(Notify::Query(Arc::clone(&watch.listener), Err(error.clone())));
                }
            }
            notes
        };
        notes.into_iter().for_each(Notify::fire);
    }

    fn apply(&self, writes: Vec<StagedWrite>) -> StoreResult<()> {
        let notes = {
            let mut state = self.lock();
            if let Some(err) = state.fail_next_commit.take() {
                return Err(err);
            }

            let now = Utc::now().timestamp_millis();
            let mut next = state.collections.clone();
            for write in &writes {
                apply_write(&mut next, write, now)?;
            }
            state.collections = next;
            state.commits += 1;

            collect_changes(&mut state)
        };
        notes.into_iter().for_each(Notify::fire);
        Ok(())
    }

    fn snapshots(collections: &Collections, collection: &str) -> Vec<DocumentSnapshot> {
        collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| DocumentSnapshot {
                        id: id.clone(),
                        data: Some(data.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn take_read_failure(&self) -> StoreResult<()> {
        match self.lock().fail_next_read.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn collect_changes(state: &mut State) -> Vec<Notify> {
    let mut notes = Vec::new();
    let collections = &state.collections;

    for watch in state.doc_watches.values_mut() {
        let current = collections
            .get(&watch.target.collection)
            .and_then(|c| c.get(&watch.target.id))
            .cloned();
        if current != watch.last {
            watch.last = current.clone();
            notes.push(Notify::Doc(
                Arc::clone(&watch.listener),
                Ok(DocumentEvent {
                    snapshot: DocumentSnapshot {
                        id: watch.target.id.clone(),
                        data: current,
                    },
                    metadata: SnapshotMetadata::server(),
                }),
            ));
        }
    }

    for watch in state.query_watches.values_mut() {
        let docs = eval::execute(
            &watch.query,
            MemoryStore::snapshots(collections, &watch.query.collection),
        );
        let changes = diff(&watch.last, &docs);
        if !changes.is_empty() {
            watch.last = docs.clone();
            notes.push(Notify::Query(
                Arc::clone(&watch.listener),
                Ok(QueryEvent {
                    docs,
                    changes,
                    metadata: SnapshotMetadata::server(),
                }),
            ));
        }
    }

    notes
}

fn diff(before: &[DocumentSnapshot], after: &[DocumentSnapshot]) -> Vec<DocumentChange> {
    let previous: HashMap<&str, &DocumentSnapshot> =
        before.iter().map(|d| (d.id.as_str(), d)).collect();
    let current: HashMap<&str, &DocumentSnapshot> =
        after.iter().map(|d| (d.id.as_str(), d)).collect();

    let mut changes: Vec<DocumentChange> = before
        .iter()
        .filter(|d| !current.contains_key(d.id.as_str()))
        .map(|d| DocumentChange {
            change_type: ChangeType::Removed,
            doc: d.clone(),
        })
        .collect();

    for doc in after {
        match previous.get(doc.id.as_str()) {
            None => changes.push(DocumentChange {
                change_type: ChangeType::Added,
                doc: doc.clone(),
            }),
            Some(old) if old.data != doc.data => changes.push(DocumentChange {
                change_type: ChangeType::Modified,
                doc: doc.clone(),
            }),
            Some(_) => {}
        }
    }
    changes
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, target: &DocRef) -> StoreResult<DocumentSnapshot> {
        self.take_read_failure()?;
        Ok(DocumentSnapshot {
            id: target.id.clone(),
            data: self.document(&target.collection, &target.id),
        })
    }

    async fn run_query(&self, query: &StoreQuery) -> StoreResult<Vec<DocumentSnapshot>> {
        self.take_read_failure()?;
        let state = self.lock();
        Ok(eval::execute(
            query,
            Self::snapshots(&state.collections, &query.collection),
        ))
    }

    fn batch(&self) -> Box<dyn WriteBatch> {
        Box::new(self.transaction())
    }

    fn listen_document(
        &self,
        target: &DocRef,
        listener: DocumentListener,
    ) -> StoreResult<ListenerHandle> {
        let key = Uuid::new_v4();
        let current = {
            let mut state = self.lock();
            let current = state
                .collections
                .get(&target.collection)
                .and_then(|c| c.get(&target.id))
                .cloned();
            state.doc_watches.insert(
                key,
                DocWatch {
                    target: target.clone(),
                    listener: Arc::clone(&listener),
                    last: current.clone(),
                },
            );
            current
        };

        listener(Ok(DocumentEvent {
            snapshot: DocumentSnapshot {
                id: target.id.clone(),
                data: current,
            },
            metadata: SnapshotMetadata::server(),
        }));

        Ok(self.handle_for(key))
    }

    fn listen_query(
        &self,
        query: &StoreQuery,
        listener: QueryListener,
    ) -> StoreResult<ListenerHandle> {
        let key = Uuid::new_v4();
        let docs = {
            let mut state = self.lock();
            let docs = eval::execute(query, Self::snapshots(&state.collections, &query.collection));
            state.query_watches.insert(
                key,
                QueryWatch {
                    query: query.clone(),
                    listener: Arc::clone(&listener),
                    last: docs.clone(),
                },
            );
            docs
        };

        let changes = docs
            .iter()
            .map(|d| DocumentChange {
                change_type: ChangeType::Added,
                doc: d.clone(),
            })
            .collect();
        listener(Ok(QueryEvent {
            docs,
            changes,
            metadata: SnapshotMetadata::server(),
        }));

        Ok(self.handle_for(key))
    }
}

impl MemoryStore {
    fn handle_for(&self, key: Uuid) -> ListenerHandle {
        let weak: Weak<Mutex<State>> = Arc::downgrade(&self.state);
        ListenerHandle::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
                state.doc_watches.remove(&key);
                state.query_watches.remove(&key);
            }
        })
    }
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Set(DocRef, FieldMap, SetMode),
    Update(DocRef, Vec<(FieldPath, FieldWrite)>),
    Delete(DocRef),
}

/// Staged writes against a [`MemoryStore`]; serves as both batch and
/// transaction.
pub struct MemoryBatch {
    store: MemoryStore,
    writes: Vec<StagedWrite>,
}

impl MemoryBatch {
    /// Number of staged writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Applies every staged write atomically
    pub fn commit_now(self) -> StoreResult<()> {
        self.store.apply(self.writes)
    }
}

impl WriteStager for MemoryBatch {
    fn set(&mut self, target: &DocRef, data: FieldMap, mode: SetMode) {
        self.writes.push(StagedWrite::Set(target.clone(), data, mode));
    }

    fn update(&mut self, target: &DocRef, fields: Vec<(FieldPath, FieldWrite)>) {
        self.writes.push(StagedWrite::Update(target.clone(), fields));
    }

    fn delete(&mut self, target: &DocRef) {
        self.writes.push(StagedWrite::Delete(target.clone()));
    }
}

#[async_trait]
impl WriteBatch for MemoryBatch {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        (*self).commit_now()
    }
}

fn apply_write(collections: &mut Collections, write: &StagedWrite, now: i64) -> StoreResult<()> {
    match write {
        StagedWrite::Set(target, data, SetMode::Overwrite) => {
            let mut doc = Document::new();
            for (key, field) in data {
                if matches!(field, FieldWrite::Delete) {
                    return Err(StoreError::InvalidArgument(format!(
                        "field delete on {} is only allowed in merge or update writes",
                        target
                    )));
                }
                if let Some(v) = resolve(field, None, now) {
                    doc.insert(key.clone(), v);
                }
            }
            collections
                .entry(target.collection.clone())
                .or_default()
                .insert(target.id.clone(), doc);
        }
        StagedWrite::Set(target, data, SetMode::Merge) => {
            let doc = collections
                .entry(target.collection.clone())
                .or_default()
                .entry(target.id.clone())
                .or_default();
            merge_into(doc, data, now);
        }
        StagedWrite::Update(target, fields) => {
            let doc = collections
                .get_mut(&target.collection)
                .and_then(|c| c.get_mut(&target.id))
                .ok_or_else(|| StoreError::NotFound(format!("no document to update: {}", target)))?;
            for (path, field) in fields {
                write_path(doc, path.segments(), field, now);
            }
        }
        StagedWrite::Delete(target) => {
            if let Some(c) = collections.get_mut(&target.collection) {
                c.remove(&target.id);
            }
        }
    }
    Ok(())
}

/// Final value of a field write; `None` removes the field
fn resolve(field: &FieldWrite, existing: Option<&Value>, now: i64) -> Option<Value> {
    match field {
        FieldWrite::Value(v) => Some(v.clone()),
        FieldWrite::Map(map) => {
            let mut obj = Document::new();
            for (k, f) in map {
                if let Some(v) = resolve(f, None, now) {
                    obj.insert(k.clone(), v);
                }
            }
            Some(Value::Object(obj))
        }
        FieldWrite::Delete => None,
        FieldWrite::Increment(by) => Some(increment(existing, *by)),
        FieldWrite::ServerTimestamp => Some(Value::from(now)),
    }
}

fn increment(existing: Option<&Value>, by: i64) -> Value {
    match existing {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::from(i.saturating_add(by)),
            None => n
                .as_f64()
                .and_then(|f| Number::from_f64(f + by as f64))
                .map_or(Value::from(by), Value::Number),
        },
        _ => Value::from(by),
    }
}

/// Merge-set semantics: maps recurse, an empty map replaces the subtree
fn merge_into(doc: &mut Document, data: &FieldMap, now: i64) {
    for (key, field) in data {
        match field {
            FieldWrite::Map(map) if !map.is_empty() => {
                let slot = doc
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Document::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Document::new());
                }
                if let Value::Object(child) = slot {
                    merge_into(child, map, now);
                }
            }
            _ => match resolve(field, doc.get(key), now) {
                Some(v) => {
                    doc.insert(key.clone(), v);
                }
                None => {
                    doc.remove(key);
                }
            },
        }
    }
}

/// Update semantics: walks to the leaf creating parents, replaces the leaf
fn write_path(doc: &mut Document, path: &[String], field: &FieldWrite, now: i64) {
    let Some((leaf, parents)) = path.split_last() else {
        return;
    };

    let mut cursor = doc;
    for seg in parents {
        let slot = cursor
            .entry(seg.clone())
            .or_insert_with(|| Value::Object(Document::new()));
        if !slot.is_object() {
            *slot = Value::Object(Document::new());
        }
        cursor = match slot {
            Value::Object(child) => child,
            _ => return,
        };
    }

    match resolve(field, cursor.get(leaf), now) {
        Some(v) => {
            cursor.insert(leaf.clone(), v);
        }
        None => {
            cursor.remove(leaf);
        }
    }
}
