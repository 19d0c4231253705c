//! # Root Handle
//!
//! Owns the store, the batch runner and every opened collection. Collections
//! are opened once per handle name; later calls return the same instance so
//! all subscribers of a collection share one registry.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::batch::{BatchRunner, WriteObserver, WriteTask};
use crate::collection::Collection;
use crate::config::LiftConfig;
use crate::error::{LiftError, LiftResult};
use crate::stats::{CollectionStats, CollectionStatsSnapshot, LiftStats};
use crate::store::{DocumentStore, WriteStager};

/// Type-erased view of an opened collection
trait CollectionControl: Send + Sync {
    fn set_disabled(&self, disabled: bool);
    fn stats_snapshot(&self) -> CollectionStatsSnapshot;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T> CollectionControl for Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn set_disabled(&self, disabled: bool) {
        Collection::set_disabled(self, disabled);
    }

    fn stats_snapshot(&self) -> CollectionStatsSnapshot {
        self.stats()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Entry point: one per store
pub struct DocLift {
    config: LiftConfig,
    runner: Arc<BatchRunner>,
    disabled: AtomicBool,
    collections: Mutex<BTreeMap<String, Arc<dyn CollectionControl>>>,
}

impl DocLift {
    /// Validates `config` and builds the handle. `observer` is notified after
    /// every committed batch.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: LiftConfig,
        observer: Option<Arc<dyn WriteObserver>>,
    ) -> LiftResult<Self> {
        config.validate()?;

        let mut runner = BatchRunner::new(store, &config);
        if let Some(observer) = observer {
            runner = runner.with_observer(observer);
        }
        info!(collections = config.collections.len(), "doclift initialized");

        Ok(Self {
            config,
            runner: Arc::new(runner),
            disabled: AtomicBool::new(false),
            collections: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn config(&self) -> &LiftConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        self.runner.store()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<dyn CollectionControl>>> {
        self.collections.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Opens the collection registered as `name` with model `T`.
    ///
    /// Fails if `name` is not configured, or was already opened with a
    /// different model type.
    pub fn collection<T>(&self, name: &str) -> LiftResult<Arc<Collection<T>>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let mut collections = self.lock();

        if let Some(existing) = collections.get(name) {
            return Arc::clone(existing)
                .into_any()
                .downcast::<Collection<T>>()
                .map_err(|_| {
                    LiftError::Config(format!(
                        "collection {} is already open with a different model type",
                        name
                    ))
                });
        }

        let config = self
            .config
            .collections
            .get(name)
            .cloned()
            .ok_or_else(|| LiftError::Config(format!("collection {} is not configured", name)))?;

        let collection = Arc::new(Collection::<T>::new(name, config, Arc::clone(&self.runner)));
        // the root toggle also covers collections opened after it was flipped
        if self.disabled.load(Ordering::SeqCst) {
            collection.set_disabled(true);
        }
        collections.insert(name.to_string(), collection.clone());
        debug!(name, collection = %collection.collection_name(), "collection opened");
        Ok(collection)
    }

    /// Runs tasks from any collections as one atomic batch, or stages them
    /// into `transaction` without committing
    pub async fn execute_batch(
        &self,
        tasks: &[WriteTask],
        transaction: Option<&mut dyn WriteStager>,
    ) -> LiftResult<()> {
        self.runner.execute(tasks, transaction).await
    }

    /// Toggles every collection, including ones opened later
    pub fn set_disabled(&self, disabled: bool) {
        let collections = self.lock();
        self.disabled.store(disabled, Ordering::SeqCst);
        for collection in collections.values() {
            collection.set_disabled(disabled);
        }
        info!(disabled, "all collections toggled");
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Stats for every configured collection. Collections never opened
    /// report zero counters.
    pub fn stats(&self) -> LiftStats {
        let collections = self.lock();
        let by_collection = self
            .config
            .collections
            .keys()
            .map(|name| {
                let snapshot = match collections.get(name) {
                    Some(c) => c.stats_snapshot(),
                    None => CollectionStats::new().snapshot(BTreeMap::new()),
                };
                (name.clone(), snapshot)
            })
            .collect();
        LiftStats::aggregate(by_collection)
    }
}

impl fmt::Debug for DocLift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocLift")
            .field("configured", &self.config.collections.len())
            .field("opened", &self.lock().len())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}
