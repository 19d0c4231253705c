//! Typed live subscriptions
//!
//! Document, multi-document and query subscriptions for one collection.
//! Provider snapshots are filtered, decoded and handed to the collection's
//! registries, which fan them out.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use tracing::warn;

use super::registry::{ErrorCallback, SubscriptionHandle, SubscriptionRegistry, ValueCallback};
use crate::collection::decode_doc;
use crate::error::{LiftError, LiftResult};
use crate::query::{compile, doc_fingerprint, query_fingerprint, SimpleQuery};
use crate::stats::CollectionStats;
use crate::store::{
    ChangeType, DocRef, DocumentEvent, DocumentSnapshot, DocumentStore, QueryEvent,
    SnapshotMetadata, StoreError, StoreResult,
};

/// One entry of a query subscription's change list
#[derive(Debug)]
pub struct Change<T> {
    pub doc: Arc<T>,
    pub change_type: ChangeType,
}

impl<T> Clone for Change<T> {
    fn clone(&self) -> Self {
        Self {
            doc: Arc::clone(&self.doc),
            change_type: self.change_type,
        }
    }
}

/// Value delivered by query subscriptions
#[derive(Debug)]
pub struct QuerySubscriptionResultSet<T> {
    pub docs: Vec<Arc<T>>,
    /// Snapshots backing `docs`, same order
    pub raw_docs: Vec<DocumentSnapshot>,
    pub changes: Vec<Change<T>>,
    pub metadata: SnapshotMetadata,
}

impl<T> QuerySubscriptionResultSet<T> {
    pub fn empty(metadata: SnapshotMetadata) -> Self {
        Self {
            docs: Vec::new(),
            raw_docs: Vec::new(),
            changes: Vec::new(),
            metadata,
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.raw_docs.iter().map(|d| d.id.as_str()).collect()
    }
}

impl<T> Clone for QuerySubscriptionResultSet<T> {
    fn clone(&self) -> Self {
        Self {
            docs: self.docs.clone(),
            raw_docs: self.raw_docs.clone(),
            changes: self.changes.clone(),
            metadata: self.metadata,
        }
    }
}

pub type DocValue<T> = Option<Arc<T>>;
pub type QueryValue<T> = Arc<QuerySubscriptionResultSet<T>>;

/// Live state shared by every subscription of one collection
pub struct RealtimeHub<T> {
    collection: String,
    store: Arc<dyn DocumentStore>,
    stats: Arc<CollectionStats>,
    disabled: Arc<AtomicBool>,
    docs: Arc<SubscriptionRegistry<DocValue<T>>>,
    queries: Arc<SubscriptionRegistry<QueryValue<T>>>,
}

impl<T> RealtimeHub<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        collection: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        stats: Arc<CollectionStats>,
        disabled: Arc<AtomicBool>,
    ) -> Self {
        let collection = collection.into();
        Self {
            docs: Arc::new(SubscriptionRegistry::new(collection.clone(), Arc::clone(&stats))),
            queries: Arc::new(SubscriptionRegistry::new(collection.clone(), Arc::clone(&stats))),
            collection,
            store,
            stats,
            disabled,
        }
    }

    pub fn doc_registry(&self) -> &Arc<SubscriptionRegistry<DocValue<T>>> {
        &self.docs
    }

    pub fn query_registry(&self) -> &Arc<SubscriptionRegistry<QueryValue<T>>> {
        &self.queries
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn provider_error(&self, target: String, err: StoreError) -> LiftError {
        LiftError::Subscription {
            collection: self.collection.clone(),
            target,
            message: err.to_string(),
        }
    }

    fn on_doc_event(&self, fingerprint: &str, id: &str, event: StoreResult<DocumentEvent>) {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                let err = self.provider_error(format!("docId:{}", id), e);
                self.docs.deliver_error(fingerprint, err);
                return;
            }
        };
        if event.metadata.is_stale_cache() {
            return;
        }
        self.stats.add_docs_fetched(1);

        let value = if self.is_disabled() {
            warn!(collection = %self.collection, id, "doc subscription delivery while collection disabled");
            self.docs.cached(fingerprint).flatten()
        } else {
            match decode_doc::<T>(&self.collection, &event.snapshot) {
                Ok(value) => value,
                Err(e) => {
                    self.docs.deliver_error(fingerprint, e);
                    return;
                }
            }
        };
        self.docs.deliver(fingerprint, value, true);
    }

    fn on_query_event(
        &self,
        fingerprint: &str,
        details: &str,
        has_fired: &AtomicBool,
        event: StoreResult<QueryEvent>,
    ) {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                let err = self.provider_error(format!("query:{}", details), e);
                self.queries.deliver_error(fingerprint, err);
                return;
            }
        };
        if event.metadata.is_stale_cache() {
            return;
        }
        self.stats.add_docs_fetched(event.changes.len() as u64);

        let value = if self.is_disabled() {
            warn!(collection = %self.collection, "query subscription delivery while collection disabled");
            self.queries
                .cached(fingerprint)
                .unwrap_or_else(|| Arc::new(QuerySubscriptionResultSet::empty(event.metadata)))
        } else {
            match self.decode_query_event(&event) {
                Ok(value) => Arc::new(value),
                Err(e) => {
                    self.queries.deliver_error(fingerprint, e);
                    return;
                }
            }
        };

        // zero-change snapshots after the first delivery are provider noise
        let fan_out = !(has_fired.load(Ordering::SeqCst) && event.changes.is_empty());
        self.queries.deliver(fingerprint, value, fan_out);
        if fan_out {
            has_fired.store(true, Ordering::SeqCst);
        }
    }

    fn decode_query_event(&self, event: &QueryEvent) -> LiftResult<QuerySubscriptionResultSet<T>> {
        let mut docs = Vec::with_capacity(event.docs.len());
        for snap in &event.docs {
            if let Some(doc) = decode_doc::<T>(&self.collection, snap)? {
                docs.push(doc);
            }
        }

        let mut changes = Vec::with_capacity(event.changes.len());
        for change in &event.changes {
            if let Some(doc) = decode_doc::<T>(&self.collection, &change.doc)? {
                changes.push(Change {
                    doc,
                    change_type: change.change_type,
                });
            }
        }

        Ok(QuerySubscriptionResultSet {
            docs,
            raw_docs: event.docs.clone(),
            changes,
            metadata: event.metadata,
        })
    }

    pub(crate) fn subscribe_doc(
        self: &Arc<Self>,
        id: &str,
        on_value: ValueCallback<DocValue<T>>,
        on_error: Option<ErrorCallback>,
    ) -> LiftResult<SubscriptionHandle> {
        let fingerprint = doc_fingerprint(id);
        let target = DocRef::new(self.collection.as_str(), id);

        let hub: Weak<Self> = Arc::downgrade(self);
        let fp = fingerprint.clone();
        let doc_id = id.to_string();
        let open = || {
            let listener = Arc::new(move |event: StoreResult<DocumentEvent>| {
                if let Some(hub) = hub.upgrade() {
                    hub.on_doc_event(&fp, &doc_id, event);
                }
            });
            self.store
                .listen_document(&target, listener)
                .map_err(LiftError::from)
        };

        self.docs.subscribe(&fingerprint, id, on_value, on_error, open)
    }

    pub(crate) fn subscribe_query(
        self: &Arc<Self>,
        query: &SimpleQuery,
        on_value: ValueCallback<QueryValue<T>>,
        on_error: Option<ErrorCallback>,
    ) -> LiftResult<SubscriptionHandle> {
        let fingerprint = query_fingerprint(query)?;
        let details = query.canonical_json()?;
        // live queries follow the declared cursors; continuation ids only
        // apply to one-shot pages
        let compiled = compile(query, &self.collection)?;

        let hub: Weak<Self> = Arc::downgrade(self);
        let fp = fingerprint.clone();
        let query_details = details.clone();
        let has_fired = AtomicBool::new(false);
        let open = || {
            let listener = Arc::new(move |event: StoreResult<QueryEvent>| {
                if let Some(hub) = hub.upgrade() {
                    hub.on_query_event(&fp, &query_details, &has_fired, event);
                }
            });
            self.store
                .listen_query(&compiled, listener)
                .map_err(LiftError::from)
        };

        self.queries
            .subscribe(&fingerprint, &details, on_value, on_error, open)
    }
}

impl<T> fmt::Debug for RealtimeHub<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeHub")
            .field("collection", &self.collection)
            .field("doc_registrations", &self.docs.len())
            .field("query_registrations", &self.queries.len())
            .finish()
    }
}

/// Live view of one document; `None` while it does not exist
pub struct DocSubscription<T> {
    hub: Arc<RealtimeHub<T>>,
    id: String,
}

impl<T> DocSubscription<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(hub: Arc<RealtimeHub<T>>, id: impl Into<String>) -> Self {
        Self { hub, id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribes without an error callback; errors are logged
    pub fn subscribe<F>(&self, on_value: F) -> LiftResult<SubscriptionHandle>
    where
        F: Fn(DocValue<T>) + Send + Sync + 'static,
    {
        self.hub.subscribe_doc(&self.id, Arc::new(on_value), None)
    }

    pub fn subscribe_with_errors<F, E>(&self, on_value: F, on_error: E) -> LiftResult<SubscriptionHandle>
    where
        F: Fn(DocValue<T>) + Send + Sync + 'static,
        E: Fn(LiftError) + Send + Sync + 'static,
    {
        self.hub
            .subscribe_doc(&self.id, Arc::new(on_value), Some(Arc::new(on_error)))
    }
}

struct DocsState<T> {
    current: Vec<DocValue<T>>,
    fired: Vec<bool>,
    fired_count: usize,
}

/// Live positional view of several documents.
///
/// Emits once every document has been delivered at least once, then on
/// every later change of any of them.
pub struct DocsSubscription<T> {
    hub: Arc<RealtimeHub<T>>,
    ids: Vec<String>,
}

impl<T> DocsSubscription<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(hub: Arc<RealtimeHub<T>>, ids: Vec<String>) -> Self {
        Self { hub, ids }
    }

    pub fn subscribe<F>(&self, on_value: F) -> LiftResult<SubscriptionHandle>
    where
        F: Fn(Vec<DocValue<T>>) + Send + Sync + 'static,
    {
        self.subscribe_inner(Arc::new(on_value), None)
    }

    pub fn subscribe_with_errors<F, E>(&self, on_value: F, on_error: E) -> LiftResult<SubscriptionHandle>
    where
        F: Fn(Vec<DocValue<T>>) + Send + Sync + 'static,
        E: Fn(LiftError) + Send + Sync + 'static,
    {
        self.subscribe_inner(Arc::new(on_value), Some(Arc::new(on_error)))
    }

    fn subscribe_inner(
        &self,
        on_value: ValueCallback<Vec<DocValue<T>>>,
        on_error: Option<ErrorCallback>,
    ) -> LiftResult<SubscriptionHandle> {
        if self.ids.is_empty() {
            on_value(Vec::new());
            return Ok(SubscriptionHandle::noop());
        }

        let legs = self.ids.len();
        let state = Arc::new(Mutex::new(DocsState {
            current: (0..legs).map(|_| None).collect(),
            fired: vec![false; legs],
            fired_count: 0,
        }));

        let mut handles = Vec::with_capacity(legs);
        for (index, id) in self.ids.iter().enumerate() {
            let state = Arc::clone(&state);
            let on_value = Arc::clone(&on_value);
            let leg: ValueCallback<DocValue<T>> = Arc::new(move |doc| {
                let ready = {
                    let mut s = state.lock().unwrap_or_else(|p| p.into_inner());
                    s.current[index] = doc;
                    if !s.fired[index] {
                        s.fired[index] = true;
                        s.fired_count += 1;
                    }
                    (s.fired_count == s.current.len()).then(|| s.current.clone())
                };
                if let Some(docs) = ready {
                    on_value(docs);
                }
            });
            handles.push(self.hub.subscribe_doc(id, leg, on_error.clone())?);
        }

        Ok(SubscriptionHandle::group(handles))
    }
}

/// Live view of one query
pub struct QuerySubscription<T> {
    hub: Arc<RealtimeHub<T>>,
    query: SimpleQuery,
}

impl<T> QuerySubscription<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(hub: Arc<RealtimeHub<T>>, query: SimpleQuery) -> Self {
        Self { hub, query }
    }

    pub fn query(&self) -> &SimpleQuery {
        &self.query
    }

    pub fn subscribe<F>(&self, on_value: F) -> LiftResult<SubscriptionHandle>
    where
        F: Fn(QueryValue<T>) + Send + Sync + 'static,
    {
        self.hub.subscribe_query(&self.query, Arc::new(on_value), None)
    }

    pub fn subscribe_with_errors<F, E>(&self, on_value: F, on_error: E) -> LiftResult<SubscriptionHandle>
    where
        F: Fn(QueryValue<T>) + Send + Sync + 'static,
        E: Fn(LiftError) + Send + Sync + 'static,
    {
        self.hub
            .subscribe_query(&self.query, Arc::new(on_value), Some(Arc::new(on_error)))
    }
}
