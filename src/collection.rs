//! # Collections
//!
//! Typed access to one store collection: writes, reads, paging, multi-query
//! merging and live subscriptions. Obtain one through
//! [`DocLift::collection`](crate::lift::DocLift::collection).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::batch::{BatchRunner, WriteTask};
use crate::config::CollectionConfig;
use crate::error::{LiftError, LiftResult};
use crate::query::{compile_anchored, merge_rows, next_page, MergeProcess, QueryResultSet, SimpleQuery};
use crate::realtime::{
    DocSubscription, DocsSubscription, MultiQuerySubscription, QuerySubscription, RealtimeHub,
};
use crate::stats::{CollectionStats, CollectionStatsSnapshot};
use crate::store::{DocRef, DocumentSnapshot, DocumentStore};
use crate::value::{PathMarker, WriteValue};

/// Per-call write options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Skip the protected root property check
    pub allow_writes_to_all_paths: bool,
}

impl WriteOptions {
    pub fn allow_all_paths() -> Self {
        Self {
            allow_writes_to_all_paths: true,
        }
    }
}

/// Decodes a snapshot into the collection model; `None` if it does not exist
pub(crate) fn decode_doc<T: DeserializeOwned>(
    collection: &str,
    snap: &DocumentSnapshot,
) -> LiftResult<Option<Arc<T>>> {
    let Some(data) = &snap.data else {
        return Ok(None);
    };
    serde_json::from_value(Value::Object(data.clone()))
        .map(|doc| Some(Arc::new(doc)))
        .map_err(|e| LiftError::decode(collection, &snap.id, e))
}

/// A typed collection handle
pub struct Collection<T> {
    name: String,
    config: CollectionConfig,
    runner: Arc<BatchRunner>,
    stats: Arc<CollectionStats>,
    disabled: Arc<AtomicBool>,
    hub: Arc<RealtimeHub<T>>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, config: CollectionConfig, runner: Arc<BatchRunner>) -> Self {
        let stats = Arc::new(CollectionStats::new());
        let disabled = Arc::new(AtomicBool::new(false));
        let hub = Arc::new(RealtimeHub::new(
            config.collection.clone(),
            Arc::clone(runner.store()),
            Arc::clone(&stats),
            Arc::clone(&disabled),
        ));
        Self {
            name: name.into(),
            config,
            runner,
            stats,
            disabled,
            hub,
        }
    }

    /// Handle name this collection was registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store collection name
    pub fn collection_name(&self) -> &str {
        &self.config.collection
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    fn store(&self) -> &Arc<dyn DocumentStore> {
        self.runner.store()
    }

    // ==================
    // Disable switch
    // ==================

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
        debug!(collection = %self.config.collection, disabled, "collection toggled");
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn refuse_while_disabled(&self, operation: &str) -> bool {
        if self.is_disabled() {
            warn!(collection = %self.config.collection, operation, "collection disabled, skipping");
            return true;
        }
        false
    }

    // ==================
    // Ids
    // ==================

    /// Allocates a new document id
    pub fn generate_id(&self) -> LiftResult<String> {
        if self.config.disable_id_generation {
            return Err(LiftError::IdGenerationDisabled(self.config.collection.clone()));
        }
        let id = self.store().new_document_id();
        if self.config.prefix_id_with_collection_name {
            Ok(format!("{}-{}", self.config.collection, id))
        } else {
            Ok(id)
        }
    }

    // ==================
    // Write tasks
    // ==================

    fn guarded(&self, task: WriteTask, options: WriteOptions) -> LiftResult<WriteTask> {
        if !options.allow_writes_to_all_paths {
            task.check_protected_roots(&self.config.root_properties_to_disallow_updates_on)?;
        }
        Ok(task)
    }

    /// Builds an add task. A missing or empty `id` in the body is generated.
    pub fn add_task(&self, doc: &T) -> LiftResult<WriteTask> {
        if self.refuse_while_disabled("add") {
            return Ok(WriteTask::Empty);
        }
        let mut doc = WriteValue::from_serialize(doc)?;
        let id = match doc.get("id").and_then(WriteValue::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let id = self.generate_id()?;
                doc.insert("id", id.clone());
                id
            }
        };
        Ok(WriteTask::Add {
            collection: self.config.collection.clone(),
            id,
            doc,
        })
    }

    /// Builds a full-overwrite task. A missing or empty `id` in the body is
    /// filled from `id`.
    pub fn set_task(&self, id: &str, doc: &T) -> LiftResult<WriteTask> {
        if self.refuse_while_disabled("set") {
            return Ok(WriteTask::Empty);
        }
        let mut doc = WriteValue::from_serialize(doc)?;
        if doc.get("id").and_then(WriteValue::as_str).map_or(true, str::is_empty) {
            doc.insert("id", id);
        }
        Ok(WriteTask::Set {
            collection: self.config.collection.clone(),
            id: id.to_string(),
            doc,
        })
    }

    /// Builds a deep-merge task from a partial payload
    pub fn update_task(&self, id: &str, patch: WriteValue, options: WriteOptions) -> LiftResult<WriteTask> {
        if self.refuse_while_disabled("update") {
            return Ok(WriteTask::Empty);
        }
        self.guarded(
            WriteTask::Update {
                collection: self.config.collection.clone(),
                id: id.to_string(),
                doc: patch,
            },
            options,
        )
    }

    /// Builds a task replacing only the top-level fields of `patch`
    pub fn update_shallow_task(
        &self,
        id: &str,
        patch: WriteValue,
        options: WriteOptions,
    ) -> LiftResult<WriteTask> {
        if self.refuse_while_disabled("updateShallow") {
            return Ok(WriteTask::Empty);
        }
        self.guarded(
            WriteTask::UpdateShallow {
                collection: self.config.collection.clone(),
                id: id.to_string(),
                doc: patch,
            },
            options,
        )
    }

    /// Builds a destructive write of the single path marked in `path`
    pub fn set_path_task(
        &self,
        id: &str,
        path: PathMarker,
        value: WriteValue,
        options: WriteOptions,
    ) -> LiftResult<WriteTask> {
        if self.refuse_while_disabled("setPath") {
            return Ok(WriteTask::Empty);
        }
        self.guarded(
            WriteTask::SetPath {
                collection: self.config.collection.clone(),
                id: id.to_string(),
                path,
                value,
            },
            options,
        )
    }

    pub fn delete_task(&self, id: &str) -> LiftResult<WriteTask> {
        if self.refuse_while_disabled("delete") {
            return Ok(WriteTask::Empty);
        }
        Ok(WriteTask::Delete {
            collection: self.config.collection.clone(),
            id: id.to_string(),
        })
    }

    // ==================
    // Writes
    // ==================

    async fn run(&self, task: WriteTask) -> LiftResult<WriteTask> {
        if task.is_empty() {
            return Ok(task);
        }
        self.runner.execute(std::slice::from_ref(&task), None).await?;
        self.stats.add_docs_written(1);
        Ok(task)
    }

    /// Upserts `doc` and returns the executed task, which carries the id
    pub async fn add(&self, doc: &T) -> LiftResult<WriteTask> {
        let task = self.add_task(doc)?;
        self.run(task).await
    }

    pub async fn set(&self, id: &str, doc: &T) -> LiftResult<WriteTask> {
        let task = self.set_task(id, doc)?;
        self.run(task).await
    }

    pub async fn update(&self, id: &str, patch: WriteValue, options: WriteOptions) -> LiftResult<WriteTask> {
        let task = self.update_task(id, patch, options)?;
        self.run(task).await
    }

    pub async fn update_shallow(
        &self,
        id: &str,
        patch: WriteValue,
        options: WriteOptions,
    ) -> LiftResult<WriteTask> {
        let task = self.update_shallow_task(id, patch, options)?;
        self.run(task).await
    }

    pub async fn set_path(
        &self,
        id: &str,
        path: PathMarker,
        value: WriteValue,
        options: WriteOptions,
    ) -> LiftResult<WriteTask> {
        let task = self.set_path_task(id, path, value, options)?;
        self.run(task).await
    }

    pub async fn delete(&self, id: &str) -> LiftResult<WriteTask> {
        let task = self.delete_task(id)?;
        self.run(task).await
    }

    // ==================
    // Reads
    // ==================

    pub async fn get_doc(&self, id: &str) -> LiftResult<Option<Arc<T>>> {
        if self.refuse_while_disabled("getDoc") {
            return Ok(None);
        }
        let snap = self
            .store()
            .get(&DocRef::new(self.config.collection.as_str(), id))
            .await
            .map_err(|e| {
                error!(collection = %self.config.collection, id, error = %e, "document read failed");
                e
            })?;
        self.stats.add_docs_fetched(1);
        decode_doc(&self.config.collection, &snap)
    }

    /// Fetches `ids` concurrently; positions of missing documents are `None`
    pub async fn get_docs(&self, ids: &[&str]) -> LiftResult<Vec<Option<Arc<T>>>> {
        if self.refuse_while_disabled("getDocs") {
            return Ok(Vec::new());
        }
        try_join_all(ids.iter().map(|id| self.get_doc(id))).await
    }

    async fn run_page(&self, query: &SimpleQuery) -> LiftResult<Vec<DocumentSnapshot>> {
        let compiled = compile_anchored(self.store().as_ref(), query, &self.config.collection).await?;
        Ok(self.store().run_query(&compiled).await?)
    }

    /// Runs one page of `query`. `next_query` is set when the page was full.
    pub async fn query(&self, query: &SimpleQuery) -> LiftResult<QueryResultSet<T>> {
        if self.refuse_while_disabled("query") {
            return Ok(QueryResultSet::empty());
        }
        let rows = match self.run_page(query).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(
                    collection = %self.config.collection,
                    query = %query.canonical_json().unwrap_or_default(),
                    error = %e,
                    "query failed"
                );
                return Err(e);
            }
        };
        self.stats.add_docs_fetched(rows.len() as u64);

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(doc) = decode_doc(&self.config.collection, row)? {
                docs.push(doc);
            }
        }
        let next_query = next_page(query, &rows);

        Ok(QueryResultSet {
            docs,
            raw_docs: rows,
            next_query,
        })
    }

    /// Runs `queries` concurrently and merges the results in query order
    pub async fn multi_query(
        &self,
        queries: &[SimpleQuery],
        process: &MergeProcess,
    ) -> LiftResult<QueryResultSet<T>> {
        if queries.is_empty() || self.refuse_while_disabled("multiQuery") {
            return Ok(QueryResultSet::empty());
        }

        let pages = try_join_all(queries.iter().map(|q| self.query(q))).await?;
        let rows: Vec<(DocumentSnapshot, Arc<T>)> = pages
            .into_iter()
            .flat_map(|page| page.raw_docs.into_iter().zip(page.docs))
            .collect();
        let (raw_docs, docs) = merge_rows(rows, process, |(raw, _)| raw).into_iter().unzip();

        Ok(QueryResultSet {
            docs,
            raw_docs,
            next_query: None,
        })
    }

    // ==================
    // Subscriptions
    // ==================

    pub fn doc_subscription(&self, id: &str) -> DocSubscription<T> {
        DocSubscription::new(Arc::clone(&self.hub), id)
    }

    pub fn docs_subscription(&self, ids: &[&str]) -> DocsSubscription<T> {
        DocsSubscription::new(
            Arc::clone(&self.hub),
            ids.iter().map(|id| id.to_string()).collect(),
        )
    }

    pub fn query_subscription(&self, query: SimpleQuery) -> QuerySubscription<T> {
        QuerySubscription::new(Arc::clone(&self.hub), query)
    }

    pub fn multi_query_subscription(
        &self,
        queries: Vec<SimpleQuery>,
        process: MergeProcess,
    ) -> MultiQuerySubscription<T> {
        MultiQuerySubscription::new(Arc::clone(&self.hub), queries, process)
    }

    // ==================
    // Stats
    // ==================

    pub fn stats(&self) -> CollectionStatsSnapshot {
        let mut active = self.hub.doc_registry().active();
        active.extend(self.hub.query_registry().active());
        self.stats.snapshot(active)
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("collection", &self.config.collection)
            .field("disabled", &self.disabled.load(Ordering::SeqCst))
            .finish()
    }
}
