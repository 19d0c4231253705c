//! Collection statistics
//!
//! Counters only, monotonic, reset on process start. Telemetry is never
//! consulted by the read or write paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::Serialize;

/// Live counters for one collection
#[derive(Debug)]
pub struct CollectionStats {
    init_ms: i64,
    docs_fetched: AtomicU64,
    docs_written: AtomicU64,
    subscriptions_opened: AtomicU64,
}

impl Default for CollectionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionStats {
    pub fn new() -> Self {
        Self {
            init_ms: Utc::now().timestamp_millis(),
            docs_fetched: AtomicU64::new(0),
            docs_written: AtomicU64::new(0),
            subscriptions_opened: AtomicU64::new(0),
        }
    }

    pub fn add_docs_fetched(&self, n: u64) {
        self.docs_fetched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_docs_written(&self, n: u64) {
        self.docs_written.fetch_add(n, Ordering::Relaxed);
    }

    /// Counts a provider subscription being opened
    pub fn increment_subscriptions(&self) {
        self.subscriptions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn docs_fetched(&self) -> u64 {
        self.docs_fetched.load(Ordering::Relaxed)
    }

    pub fn docs_written(&self) -> u64 {
        self.docs_written.load(Ordering::Relaxed)
    }

    pub fn subscriptions_opened(&self) -> u64 {
        self.subscriptions_opened.load(Ordering::Relaxed)
    }

    /// Freezes the counters together with the currently active registrations
    pub fn snapshot(&self, active: BTreeMap<String, ActiveSubscription>) -> CollectionStatsSnapshot {
        CollectionStatsSnapshot {
            stats_init_ms: self.init_ms,
            docs_fetched: self.docs_fetched(),
            docs_written: self.docs_written(),
            total_subscriptions_over_time: self.subscriptions_opened(),
            active_subscriptions: active,
        }
    }
}

/// One live registration as seen by stats
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSubscription {
    /// Document id or serialized query
    pub subscription_details: String,
    pub subscriber_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatsSnapshot {
    pub stats_init_ms: i64,
    pub docs_fetched: u64,
    pub docs_written: u64,
    pub total_subscriptions_over_time: u64,
    /// Keyed by fingerprint
    pub active_subscriptions: BTreeMap<String, ActiveSubscription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub stats_init_ms: i64,
    pub total_docs_fetched: u64,
    pub total_docs_written: u64,
    pub total_subscriptions_over_time: u64,
    pub total_active_subscriptions: usize,
}

/// Stats across every registered collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiftStats {
    pub summary: StatsSummary,
    pub by_collection: BTreeMap<String, CollectionStatsSnapshot>,
}

impl LiftStats {
    pub fn aggregate(by_collection: BTreeMap<String, CollectionStatsSnapshot>) -> Self {
        let mut summary = StatsSummary {
            stats_init_ms: Utc::now().timestamp_millis(),
            total_docs_fetched: 0,
            total_docs_written: 0,
            total_subscriptions_over_time: 0,
            total_active_subscriptions: 0,
        };
        for s in by_collection.values() {
            summary.total_docs_fetched += s.docs_fetched;
            summary.total_docs_written += s.docs_written;
            summary.total_subscriptions_over_time += s.total_subscriptions_over_time;
            summary.total_active_subscriptions += s.active_subscriptions.len();
        }
        Self {
            summary,
            by_collection,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
