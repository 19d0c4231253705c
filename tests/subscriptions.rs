//! Subscription Multiplexer Tests
//!
//! Live subscriptions against the in-memory store:
//! - One provider listener per fingerprint, refcounted
//! - Cached value replay for late subscribers
//! - Stale-cache and heartbeat suppression
//! - Multi-document and multi-query composition
//! - Error routing and the disable switch

use std::sync::{Arc, Mutex};

use doclift::store::{
    DocRef, Direction, FieldWrite, SetMode, SnapshotMetadata, WhereOp, WriteStager,
};
use doclift::{
    Collection, CollectionConfig, DocLift, LiftConfig, LiftError, MemoryStore, MergeProcess,
    SimpleQuery, StoreError, SubscriptionHandle, WriteOptions, WriteValue,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    #[serde(default)]
    id: String,
    name: String,
    age: i64,
}

fn person(id: &str, name: &str, age: i64) -> Person {
    Person {
        id: id.to_string(),
        name: name.to_string(),
        age,
    }
}

async fn setup() -> (MemoryStore, DocLift, Arc<Collection<Person>>) {
    let store = MemoryStore::new();
    let config = LiftConfig::default().with_collection("Person", CollectionConfig::new("person"));
    let lift = DocLift::new(Arc::new(store.clone()), config, None).unwrap();
    let people = lift.collection::<Person>("Person").unwrap();

    for p in [
        person("kevin", "Kevin", 36),
        person("henry", "Henry", 3),
        person("hazel", "Hazel", 1),
        person("elaine", "Elaine", 33),
    ] {
        people.set(&p.id.clone(), &p).await.unwrap();
    }
    (store, lift, people)
}

type Log<T> = Arc<Mutex<Vec<T>>>;

fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

fn age_patch(age: i64) -> WriteValue {
    WriteValue::object().with("age", age)
}

fn cache_only() -> SnapshotMetadata {
    SnapshotMetadata {
        from_cache: true,
        has_pending_writes: false,
    }
}

// =============================================================================
// Document Subscriptions
// =============================================================================

/// Two subscribers on one document share a single provider listener.
#[tokio::test]
async fn test_doc_subscriptions_share_listener() {
    let (store, _lift, people) = setup().await;
    let first: Log<Option<i64>> = log();
    let second: Log<Option<i64>> = log();

    let sink = first.clone();
    let a = people
        .doc_subscription("kevin")
        .subscribe(move |doc| sink.lock().unwrap().push(doc.map(|p| p.age)))
        .unwrap();
    let sink = second.clone();
    let b = people
        .doc_subscription("kevin")
        .subscribe(move |doc| sink.lock().unwrap().push(doc.map(|p| p.age)))
        .unwrap();

    assert_eq!(store.listener_count(), 1);
    assert_eq!(*first.lock().unwrap(), vec![Some(36)]);
    assert_eq!(*second.lock().unwrap(), vec![Some(36)]);

    people.update("kevin", age_patch(37), WriteOptions::default()).await.unwrap();
    assert_eq!(first.lock().unwrap().last(), Some(&Some(37)));
    assert_eq!(second.lock().unwrap().last(), Some(&Some(37)));

    a.unsubscribe();
    assert_eq!(store.listener_count(), 1);
    people.update("kevin", age_patch(38), WriteOptions::default()).await.unwrap();
    assert_eq!(first.lock().unwrap().last(), Some(&Some(37)));
    assert_eq!(second.lock().unwrap().last(), Some(&Some(38)));

    b.unsubscribe();
    b.unsubscribe();
    assert_eq!(store.listener_count(), 0);
    assert!(people.stats().active_subscriptions.is_empty());
}

type Slot = Arc<Mutex<Option<SubscriptionHandle>>>;

/// A callback may unsubscribe its own handle; later changes are not delivered.
#[tokio::test]
async fn test_unsubscribe_inside_callback() {
    let (store, _lift, people) = setup().await;
    let seen: Log<Option<i64>> = log();
    let slot: Slot = Arc::default();

    let sink = seen.clone();
    let own = slot.clone();
    let handle = people
        .doc_subscription("kevin")
        .subscribe(move |doc| {
            sink.lock().unwrap().push(doc.map(|p| p.age));
            if let Some(handle) = own.lock().unwrap().as_ref() {
                handle.unsubscribe();
            }
        })
        .unwrap();
    *slot.lock().unwrap() = Some(handle);

    people.update("kevin", age_patch(37), WriteOptions::default()).await.unwrap();
    assert_eq!(store.listener_count(), 0);

    people.update("kevin", age_patch(38), WriteOptions::default()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Some(36), Some(37)]);
}

/// Unsubscribing another subscriber mid fan-out still hands it the current value.
#[tokio::test]
async fn test_unsubscribe_other_during_fan_out() {
    let (store, _lift, people) = setup().await;
    let seen: Log<(char, Option<i64>)> = log();
    let other: Slot = Arc::default();

    let sink = seen.clone();
    let target = other.clone();
    let _a = people
        .doc_subscription("kevin")
        .subscribe(move |doc| {
            sink.lock().unwrap().push(('a', doc.map(|p| p.age)));
            if let Some(handle) = target.lock().unwrap().as_ref() {
                handle.unsubscribe();
            }
        })
        .unwrap();
    let sink = seen.clone();
    let b = people
        .doc_subscription("kevin")
        .subscribe(move |doc| sink.lock().unwrap().push(('b', doc.map(|p| p.age))))
        .unwrap();
    *other.lock().unwrap() = Some(b);

    people.update("kevin", age_patch(37), WriteOptions::default()).await.unwrap();
    people.update("kevin", age_patch(38), WriteOptions::default()).await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ('a', Some(36)),
            ('b', Some(36)),
            ('a', Some(37)),
            ('b', Some(37)),
            ('a', Some(38)),
        ]
    );
    assert_eq!(store.listener_count(), 1);
}

/// Dropping a handle tears the subscription down.
#[tokio::test]
async fn test_dropped_handle_unsubscribes() {
    let (store, _lift, people) = setup().await;
    {
        let _handle = people.doc_subscription("kevin").subscribe(|_| {}).unwrap();
        assert_eq!(store.listener_count(), 1);
    }
    assert_eq!(store.listener_count(), 0);
}

/// A missing document is delivered as `None`.
#[tokio::test]
async fn test_missing_document() {
    let (_store, _lift, people) = setup().await;
    let seen: Log<Option<i64>> = log();
    let sink = seen.clone();
    let _handle = people
        .doc_subscription("ghost")
        .subscribe(move |doc| sink.lock().unwrap().push(doc.map(|p| p.age)))
        .unwrap();

    people.set("ghost", &person("ghost", "Ghost", 99)).await.unwrap();
    people.delete("ghost").await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![None, Some(99), None]);
}

/// Cache-only snapshots are dropped; server snapshots are delivered.
#[tokio::test]
async fn test_stale_cache_suppressed() {
    let (store, _lift, people) = setup().await;
    let seen: Log<Option<i64>> = log();
    let sink = seen.clone();
    let _handle = people
        .doc_subscription("kevin")
        .subscribe(move |doc| sink.lock().unwrap().push(doc.map(|p| p.age)))
        .unwrap();

    store.emit_heartbeat(cache_only());
    assert_eq!(seen.lock().unwrap().len(), 1);

    store.emit_heartbeat(SnapshotMetadata {
        from_cache: true,
        has_pending_writes: true,
    });
    assert_eq!(seen.lock().unwrap().len(), 2);
}

/// Provider errors reach error callbacks with the subscription target.
#[tokio::test]
async fn test_errors_reach_error_callbacks() {
    let (store, _lift, people) = setup().await;
    let errors: Log<LiftError> = log();
    let sink = errors.clone();
    let _handle = people
        .doc_subscription("kevin")
        .subscribe_with_errors(|_| {}, move |err| sink.lock().unwrap().push(err))
        .unwrap();
    let _silent = people.doc_subscription("henry").subscribe(|_| {}).unwrap();

    store.fail_listeners("person", StoreError::PermissionDenied("rules".to_string()));

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), "SUBSCRIPTION_FAILED");
    assert!(errors[0].to_string().contains("docId:kevin"));
    assert!(errors[0].to_string().contains("person"));
}

/// Multi-document views emit once all legs have delivered, then per change.
#[tokio::test]
async fn test_docs_subscription() {
    let (_store, _lift, people) = setup().await;
    let seen: Log<Vec<Option<i64>>> = log();
    let sink = seen.clone();
    let _handle = people
        .docs_subscription(&["kevin", "ghost", "henry"])
        .subscribe(move |docs| {
            sink.lock()
                .unwrap()
                .push(docs.iter().map(|d| d.as_ref().map(|p| p.age)).collect())
        })
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![vec![Some(36), None, Some(3)]]);

    people.update("henry", age_patch(4), WriteOptions::default()).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(seen.lock().unwrap()[1], vec![Some(36), None, Some(4)]);
}

/// An empty id list emits one empty value.
#[tokio::test]
async fn test_docs_subscription_without_ids() {
    let (store, _lift, people) = setup().await;
    let seen: Log<usize> = log();
    let sink = seen.clone();
    let handle = people
        .docs_subscription(&[])
        .subscribe(move |docs| sink.lock().unwrap().push(docs.len()))
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0]);
    assert!(!handle.is_active());
    assert_eq!(store.listener_count(), 0);
}

// =============================================================================
// Query Subscriptions
// =============================================================================

fn adults() -> SimpleQuery {
    SimpleQuery::new()
        .filter("age", WhereOp::Gt, 18)
        .order_by("age", Direction::Asc)
}

/// A late subscriber gets the cached result before any new delivery.
#[tokio::test]
async fn test_late_joiner_gets_cached_query() {
    let (store, _lift, people) = setup().await;
    let first: Log<Vec<String>> = log();
    let sink = first.clone();
    let _a = people
        .query_subscription(adults())
        .subscribe(move |rs| {
            sink.lock()
                .unwrap()
                .push(rs.ids().into_iter().map(String::from).collect())
        })
        .unwrap();

    people.update("henry", age_patch(20), WriteOptions::default()).await.unwrap();
    let commits = store.commit_count();

    let late: Log<Vec<String>> = log();
    let sink = late.clone();
    let _b = people
        .query_subscription(adults())
        .subscribe(move |rs| {
            sink.lock()
                .unwrap()
                .push(rs.ids().into_iter().map(String::from).collect())
        })
        .unwrap();

    assert_eq!(store.commit_count(), commits);
    assert_eq!(store.listener_count(), 1);
    assert_eq!(*late.lock().unwrap(), vec![vec!["henry", "elaine", "kevin"]]);
}

/// Initial query delivery carries every row as an added change.
#[tokio::test]
async fn test_query_changes() {
    let (_store, _lift, people) = setup().await;
    let changes: Log<usize> = log();
    let sink = changes.clone();
    let _handle = people
        .query_subscription(adults())
        .subscribe(move |rs| sink.lock().unwrap().push(rs.changes.len()))
        .unwrap();

    people.update("kevin", age_patch(40), WriteOptions::default()).await.unwrap();
    assert_eq!(*changes.lock().unwrap(), vec![2, 1]);
}

/// Zero-change snapshots after the first delivery refresh the cache only.
#[tokio::test]
async fn test_query_heartbeat_suppressed() {
    let (store, _lift, people) = setup().await;
    let seen: Log<usize> = log();
    let sink = seen.clone();
    let _handle = people
        .query_subscription(adults())
        .subscribe(move |rs| sink.lock().unwrap().push(rs.docs.len()))
        .unwrap();

    store.emit_heartbeat(SnapshotMetadata::server());
    store.emit_heartbeat(cache_only());
    assert_eq!(*seen.lock().unwrap(), vec![2]);
}

/// The first delivery of an empty query still fires.
#[tokio::test]
async fn test_empty_query_first_delivery_fires() {
    let (_store, _lift, people) = setup().await;
    let seen: Log<usize> = log();
    let sink = seen.clone();
    let _handle = people
        .query_subscription(SimpleQuery::new().filter("age", WhereOp::Gt, 500))
        .subscribe(move |rs| sink.lock().unwrap().push(rs.docs.len()))
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![0]);
}

/// Stats list every live registration with its subscriber count.
#[tokio::test]
async fn test_active_subscription_stats() {
    let (_store, lift, people) = setup().await;
    let _a = people.query_subscription(adults()).subscribe(|_| {}).unwrap();
    let _b = people.query_subscription(adults()).subscribe(|_| {}).unwrap();
    let _c = people.doc_subscription("kevin").subscribe(|_| {}).unwrap();

    let stats = people.stats();
    assert_eq!(stats.active_subscriptions.len(), 2);
    assert_eq!(stats.total_subscriptions_over_time, 2);
    let counts: Vec<usize> = stats
        .active_subscriptions
        .values()
        .map(|a| a.subscriber_count)
        .collect();
    assert!(counts.contains(&2));
    assert!(counts.contains(&1));
    assert_eq!(lift.stats().summary.total_active_subscriptions, 2);
}

// =============================================================================
// Multi-Query Subscriptions
// =============================================================================

/// First aggregate waits for every leg and reports no changes.
#[tokio::test]
async fn test_multi_query_subscription() {
    let (_store, _lift, people) = setup().await;
    let seen: Log<(Vec<String>, usize)> = log();
    let sink = seen.clone();

    let queries = vec![
        SimpleQuery::new().filter("age", WhereOp::Lt, 5),
        SimpleQuery::new().filter("age", WhereOp::Gt, 30),
        SimpleQuery::new().filter("age", WhereOp::Lt, 2),
    ];
    let process = MergeProcess::dedupe().sorted_by("age", Direction::Desc);
    let _handle = people
        .multi_query_subscription(queries, process)
        .subscribe(move |rs| {
            sink.lock().unwrap().push((
                rs.ids().into_iter().map(String::from).collect(),
                rs.changes.len(),
            ))
        })
        .unwrap();

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, vec!["kevin", "elaine", "henry", "hazel"]);
        assert_eq!(seen[0].1, 0);
    }

    people.update("elaine", age_patch(50), WriteOptions::default()).await.unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].0, vec!["elaine", "kevin", "henry", "hazel"]);
    assert_eq!(seen[1].1, 1);
}

/// With no queries a single empty aggregate is emitted.
#[tokio::test]
async fn test_multi_query_subscription_without_queries() {
    let (store, _lift, people) = setup().await;
    let seen: Log<usize> = log();
    let sink = seen.clone();
    let _handle = people
        .multi_query_subscription(Vec::new(), MergeProcess::default())
        .subscribe(move |rs| sink.lock().unwrap().push(rs.docs.len()))
        .unwrap();

    people.update("kevin", age_patch(1), WriteOptions::default()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![0]);
    assert_eq!(store.listener_count(), 0);
}

// =============================================================================
// Disable Switch
// =============================================================================

/// While disabled, deliveries replay the cached value and listeners stay open.
#[tokio::test]
async fn test_disabled_replays_cache() {
    let (store, _lift, people) = setup().await;
    let seen: Log<Option<i64>> = log();
    let sink = seen.clone();
    let _handle = people
        .doc_subscription("kevin")
        .subscribe(move |doc| sink.lock().unwrap().push(doc.map(|p| p.age)))
        .unwrap();

    people.set_disabled(true);

    // write behind the collection's back
    let mut tx = store.transaction();
    tx.update(
        &DocRef::new("person", "kevin"),
        vec![("age".into(), FieldWrite::Value(json!(80)))],
    );
    tx.commit_now().unwrap();

    assert_eq!(store.listener_count(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![Some(36), Some(36)]);

    people.set_disabled(false);
    let mut tx = store.transaction();
    tx.set(
        &DocRef::new("person", "kevin"),
        [("age".to_string(), FieldWrite::Value(json!(81)))]
            .into_iter()
            .collect(),
        SetMode::Merge,
    );
    tx.commit_now().unwrap();
    assert_eq!(seen.lock().unwrap().last(), Some(&Some(81)));
}

/// Disabled query subscriptions replay the cached result, or an empty one.
#[tokio::test]
async fn test_disabled_query_replays_cache() {
    let (store, _lift, people) = setup().await;
    let seen: Log<Vec<String>> = log();
    let sink = seen.clone();
    let _handle = people
        .query_subscription(adults())
        .subscribe(move |rs| {
            sink.lock()
                .unwrap()
                .push(rs.ids().into_iter().map(String::from).collect())
        })
        .unwrap();

    people.set_disabled(true);

    let mut tx = store.transaction();
    tx.update(
        &DocRef::new("person", "elaine"),
        vec![("age".into(), FieldWrite::Value(json!(80)))],
    );
    tx.commit_now().unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![vec!["elaine", "kevin"], vec!["elaine", "kevin"]]
    );

    let fresh: Log<usize> = log();
    let sink = fresh.clone();
    let _uncached = people
        .query_subscription(SimpleQuery::new().filter("age", WhereOp::Lt, 10))
        .subscribe(move |rs| sink.lock().unwrap().push(rs.docs.len()))
        .unwrap();
    assert_eq!(*fresh.lock().unwrap(), vec![0]);
    assert_eq!(store.listener_count(), 2);
}
