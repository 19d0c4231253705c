//! doclift - Typed write batching and shared live subscriptions over a
//! document store
//!
//! ## Modules
//!
//! - **batch**: write tasks, sentinel scrubbing, atomic batch execution
//! - **query**: declarative queries, pagination, multi-query merging
//! - **realtime**: fingerprinted subscription registry and live views
//! - **collection** / **lift**: the typed application-facing API
//! - **store**: driver boundary plus an in-memory reference store

pub mod batch;
pub mod collection;
pub mod config;
pub mod error;
pub mod id;
pub mod lift;
pub mod query;
pub mod realtime;
pub mod stats;
pub mod store;
pub mod value;

pub use batch::{BatchRunner, ChangeKind, WriteObserver, WriteTask, WrittenDocument};
pub use collection::{Collection, WriteOptions};
pub use config::{CollectionConfig, LiftConfig};
pub use error::{LiftError, LiftResult};
pub use lift::DocLift;
pub use query::{MergeProcess, QueryResultSet, SimpleQuery, Where};
pub use realtime::{QuerySubscriptionResultSet, SubscriptionHandle};
pub use stats::LiftStats;
pub use store::{DocumentStore, MemoryStore, StoreError};
pub use value::{PathMarker, Sentinel, WriteValue};
