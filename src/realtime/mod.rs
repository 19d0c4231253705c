//! # Subscription Multiplexer
//!
//! Live document and query subscriptions with one provider listener per
//! distinct target.
//!
//! ## Architecture
//!
//! - **Registry**: fingerprint → subscribers, cached value, listener handle
//! - **Subscriptions**: typed doc, docs and query views over the registries
//! - **Multi**: merged view over several query subscriptions
//!
//! ## Delivery
//!
//! - Cache-only snapshots without pending writes are dropped
//! - Zero-change query snapshots after the first delivery refresh the cache
//!   but are not fanned out
//! - A subscriber joining a live target gets the cached value immediately
//! - Provider errors go to error callbacks, or are logged when none exist

pub mod multi;
pub mod registry;
pub mod subscription;

pub use multi::MultiQuerySubscription;
pub use registry::{ErrorCallback, SubscriptionHandle, SubscriptionRegistry, ValueCallback};
pub use subscription::{
    Change, DocSubscription, DocValue, DocsSubscription, QuerySubscription,
    QuerySubscriptionResultSet, QueryValue, RealtimeHub,
};
