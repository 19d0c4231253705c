//! Batch runner
//!
//! Compiles a list of write tasks into store writes and applies them as one
//! atomic batch, or stages them into a caller-owned transaction.
//!
//! Compilation happens in full before anything is staged, so a validation
//! error never leaves a partially built batch behind.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::scrub::{scrub_document, scrub_value};
use super::task::{ChangeKind, WriteTask};
use crate::config::LiftConfig;
use crate::error::{LiftError, LiftResult};
use crate::store::{DocRef, DocumentStore, FieldMap, FieldWrite, SetMode, WriteStager};
use crate::value::{resolve_path, FieldPath};

/// Error type returned by write observers
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Summary of one committed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenDocument {
    pub collection: String,
    pub id: String,
    pub kind: ChangeKind,
}

/// Notified after every committed batch.
///
/// The runner waits for the observer at most the configured timeout. A slow
/// observer keeps running in the background; its result is only logged.
#[async_trait]
pub trait WriteObserver: Send + Sync + 'static {
    async fn on_write(&self, writes: Vec<WrittenDocument>) -> Result<(), ObserverError>;
}

/// A task lowered to store operations
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledWrite {
    Set {
        target: DocRef,
        data: FieldMap,
        mode: SetMode,
    },
    Update {
        target: DocRef,
        fields: Vec<(FieldPath, FieldWrite)>,
    },
    Delete {
        target: DocRef,
    },
}

impl CompiledWrite {
    pub fn target(&self) -> &DocRef {
        match self {
            CompiledWrite::Set { target, .. }
            | CompiledWrite::Update { target, .. }
            | CompiledWrite::Delete { target } => target,
        }
    }

    fn stage<S: WriteStager + ?Sized>(self, stager: &mut S) {
        match self {
            CompiledWrite::Set { target, data, mode } => stager.set(&target, data, mode),
            CompiledWrite::Update { target, fields } => stager.update(&target, fields),
            CompiledWrite::Delete { target } => stager.delete(&target),
        }
    }
}

/// Executes write tasks against a document store
pub struct BatchRunner {
    store: Arc<dyn DocumentStore>,
    observer: Option<Arc<dyn WriteObserver>>,
    observer_timeout: Duration,
    stamp_field: Option<String>,
    last_stamp: AtomicI64,
}

impl BatchRunner {
    pub fn new(store: Arc<dyn DocumentStore>, config: &LiftConfig) -> Self {
        Self {
            store,
            observer: None,
            observer_timeout: config.write_observer_timeout(),
            stamp_field: config.stamp_field().map(str::to_string),
            last_stamp: AtomicI64::new(0),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn WriteObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Strictly increasing millisecond clock
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(prev + 1)
    }

    /// Validates and lowers `tasks`. Empty tasks are skipped.
    pub fn compile(&self, tasks: &[WriteTask]) -> LiftResult<Vec<CompiledWrite>> {
        let stamp = self.next_stamp();
        tasks
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| self.compile_task(t, stamp))
            .collect()
    }

    fn compile_task(&self, task: &WriteTask, stamp: i64) -> LiftResult<CompiledWrite> {
        let (collection, id) = match (task.collection(), task.id()) {
            (Some(c), Some(id)) if !id.is_empty() => (c, id),
            (c, _) => {
                return Err(LiftError::MissingId {
                    collection: c.unwrap_or_default().to_string(),
                    task_type: task.type_name(),
                })
            }
        };
        let target = DocRef::new(collection, id);

        let compiled = match task {
            WriteTask::Add { doc, .. } => CompiledWrite::Set {
                target,
                data: self.stamped(scrub_document(doc, false)?, stamp),
                mode: SetMode::Merge,
            },
            WriteTask::Set { doc, .. } => CompiledWrite::Set {
                target,
                data: self.stamped(scrub_document(doc, false)?, stamp),
                mode: SetMode::Overwrite,
            },
            WriteTask::Update { doc, .. } => CompiledWrite::Set {
                target,
                data: self.stamped(scrub_document(doc, true)?, stamp),
                mode: SetMode::Merge,
            },
            WriteTask::UpdateShallow { doc, .. } => {
                let mut fields: Vec<(FieldPath, FieldWrite)> = scrub_document(doc, false)?
                    .into_iter()
                    .map(|(k, v)| (FieldPath::new(vec![k]), v))
                    .collect();
                self.push_stamp(&mut fields, stamp);
                CompiledWrite::Update { target, fields }
            }
            WriteTask::SetPath { path, value, .. } => {
                let (path, resolved) = resolve_path(path, value)?;
                let mut fields = vec![(path, scrub_value(&resolved, false)?)];
                self.push_stamp(&mut fields, stamp);
                CompiledWrite::Update { target, fields }
            }
            WriteTask::Delete { .. } => CompiledWrite::Delete { target },
            WriteTask::Empty => {
                return Err(LiftError::InvalidPayload(
                    "empty task reached compilation".to_string(),
                ))
            }
        };
        Ok(compiled)
    }

    fn stamped(&self, mut data: FieldMap, stamp: i64) -> FieldMap {
        if let Some(field) = &self.stamp_field {
            data.insert(field.clone(), FieldWrite::Value(Value::from(stamp)));
        }
        data
    }

    fn push_stamp(&self, fields: &mut Vec<(FieldPath, FieldWrite)>, stamp: i64) {
        if let Some(field) = &self.stamp_field {
            fields.push((
                FieldPath::new(vec![field.clone()]),
                FieldWrite::Value(Value::from(stamp)),
            ));
        }
    }

    /// Runs `tasks` as one atomic batch.
    ///
    /// With a transaction, the writes are only staged into it. The caller
    /// owns the commit and the write observer is not notified.
    pub async fn execute(
        &self,
        tasks: &[WriteTask],
        transaction: Option<&mut dyn WriteStager>,
    ) -> LiftResult<()> {
        let compiled = self.compile(tasks)?;
        if compiled.is_empty() {
            return Ok(());
        }

        if let Some(tx) = transaction {
            debug!(writes = compiled.len(), "staging writes into transaction");
            for write in compiled {
                write.stage(&mut *tx);
            }
            return Ok(());
        }

        let count = compiled.len();
        let mut batch = self.store.batch();
        for write in compiled {
            write.stage(batch.as_mut());
        }
        if let Err(e) = batch.commit().await {
            error!(error = %e, writes = count, "batch commit failed");
            return Err(e.into());
        }
        debug!(writes = count, "batch committed");

        self.notify_observer(tasks).await;
        Ok(())
    }

    async fn notify_observer(&self, tasks: &[WriteTask]) {
        let Some(observer) = &self.observer else {
            return;
        };

        let records: Vec<WrittenDocument> = tasks
            .iter()
            .filter_map(|t| {
                Some(WrittenDocument {
                    collection: t.collection()?.to_string(),
                    id: t.id()?.to_string(),
                    kind: t.change_kind()?,
                })
            })
            .collect();
        if records.is_empty() {
            return;
        }

        let observer = Arc::clone(observer);
        let pending = tokio::spawn(async move { observer.on_write(records).await });

        match tokio::time::timeout(self.observer_timeout, pending).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "write observer failed"),
            Ok(Err(e)) => error!(error = %e, "write observer task aborted"),
            Err(_) => warn!(
                timeout_ms = self.observer_timeout.as_millis() as u64,
                "write observer timed out"
            ),
        }
    }
}
