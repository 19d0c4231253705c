//! Multi-query subscriptions
//!
//! Several query subscriptions combined into one live result. Each leg keeps
//! its latest result set; once every leg has delivered, the legs are
//! concatenated in query order and merged.

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;

use super::registry::{ErrorCallback, SubscriptionHandle, ValueCallback};
use super::subscription::{QuerySubscriptionResultSet, QueryValue, RealtimeHub};
use crate::error::{LiftError, LiftResult};
use crate::query::{merge_rows, MergeProcess, SimpleQuery};
use crate::store::{DocumentSnapshot, SnapshotMetadata};

struct MultiState<T> {
    legs: Vec<Option<QueryValue<T>>>,
    emitted: bool,
}

impl<T> MultiState<T> {
    /// Stores `value` for leg `index` and builds the aggregate when every
    /// leg has delivered at least once
    fn accept(
        &mut self,
        index: usize,
        value: QueryValue<T>,
        process: &MergeProcess,
    ) -> Option<QueryValue<T>> {
        self.legs[index] = Some(Arc::clone(&value));
        if self.legs.iter().any(Option::is_none) {
            return None;
        }

        let mut rows: Vec<(DocumentSnapshot, Arc<T>)> = Vec::new();
        for leg in self.legs.iter().flatten() {
            rows.extend(
                leg.raw_docs
                    .iter()
                    .cloned()
                    .zip(leg.docs.iter().cloned()),
            );
        }
        let rows = merge_rows(rows, process, |(raw, _)| raw);

        // the first aggregate describes no change of its own
        let changes = if self.emitted {
            value.changes.clone()
        } else {
            Vec::new()
        };
        self.emitted = true;

        let (raw_docs, docs) = rows.into_iter().unzip();
        Some(Arc::new(QuerySubscriptionResultSet {
            docs,
            raw_docs,
            changes,
            metadata: value.metadata,
        }))
    }
}

/// Live merged view of several queries
pub struct MultiQuerySubscription<T> {
    hub: Arc<RealtimeHub<T>>,
    queries: Vec<SimpleQuery>,
    process: MergeProcess,
}

impl<T> MultiQuerySubscription<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(hub: Arc<RealtimeHub<T>>, queries: Vec<SimpleQuery>, process: MergeProcess) -> Self {
        Self {
            hub,
            queries,
            process,
        }
    }

    pub fn queries(&self) -> &[SimpleQuery] {
        &self.queries
    }

    pub fn subscribe<F>(&self, on_value: F) -> LiftResult<SubscriptionHandle>
    where
        F: Fn(QueryValue<T>) + Send + Sync + 'static,
    {
        self.subscribe_inner(Arc::new(on_value), None)
    }

    pub fn subscribe_with_errors<F, E>(&self, on_value: F, on_error: E) -> LiftResult<SubscriptionHandle>
    where
        F: Fn(QueryValue<T>) + Send + Sync + 'static,
        E: Fn(LiftError) + Send + Sync + 'static,
    {
        self.subscribe_inner(Arc::new(on_value), Some(Arc::new(on_error)))
    }

    fn subscribe_inner(
        &self,
        on_value: ValueCallback<QueryValue<T>>,
        on_error: Option<ErrorCallback>,
    ) -> LiftResult<SubscriptionHandle> {
        if self.queries.is_empty() {
            on_value(Arc::new(QuerySubscriptionResultSet::empty(
                SnapshotMetadata::server(),
            )));
            return Ok(SubscriptionHandle::noop());
        }

        let state = Arc::new(Mutex::new(MultiState {
            legs: (0..self.queries.len()).map(|_| None).collect(),
            emitted: false,
        }));
        let process = Arc::new(self.process.clone());

        let mut handles = Vec::with_capacity(self.queries.len());
        for (index, query) in self.queries.iter().enumerate() {
            let state = Arc::clone(&state);
            let process = Arc::clone(&process);
            let on_value = Arc::clone(&on_value);
            let leg: ValueCallback<QueryValue<T>> = Arc::new(move |value| {
                let ready = state
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .accept(index, value, &process);
                if let Some(merged) = ready {
                    on_value(merged);
                }
            });
            handles.push(self.hub.subscribe_query(query, leg, on_error.clone())?);
        }

        Ok(SubscriptionHandle::group(handles))
    }
}
