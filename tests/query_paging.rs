//! Query & Pagination Tests
//!
//! One-shot reads through the collection API:
//! - Continuation-based paging
//! - Cursor bounds and nested where syntax
//! - Multi-query merge, dedupe and sort

use std::collections::HashSet;
use std::sync::Arc;

use doclift::store::{Direction, WhereOp};
use doclift::{
    Collection, CollectionConfig, DocLift, LiftConfig, LiftError, MemoryStore, MergeProcess,
    SimpleQuery, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    id: String,
    name: String,
    age: i64,
    #[serde(default)]
    fav_foods: serde_json::Map<String, serde_json::Value>,
}

async fn seeded() -> (MemoryStore, Arc<Collection<Person>>) {
    let store = MemoryStore::new();
    let config = LiftConfig::default().with_collection("Person", CollectionConfig::new("person"));
    let lift = DocLift::new(Arc::new(store.clone()), config, None).unwrap();
    let people = lift.collection::<Person>("Person").unwrap();

    let rows = [
        ("p1", "Kevin", 36, json!({"american": "burger"})),
        ("p2", "Henry", 3, json!({"american": "hotdog"})),
        ("p3", "Hazel", 1, json!({})),
        ("p4", "Elaine", 33, json!({"american": "burger", "italian": "pizza"})),
        ("p5", "Bob", 70, json!({})),
    ];
    for (id, name, age, foods) in rows {
        let person = Person {
            id: id.to_string(),
            name: name.to_string(),
            age,
            fav_foods: foods.as_object().cloned().unwrap_or_default(),
        };
        people.set(id, &person).await.unwrap();
    }
    (store, people)
}

fn names(docs: &[Arc<Person>]) -> Vec<&str> {
    docs.iter().map(|p| p.name.as_str()).collect()
}

// =============================================================================
// Pagination
// =============================================================================

/// Five documents at limit 2 take exactly three pages.
#[tokio::test]
async fn test_pages_visit_every_document_once() {
    let (_store, people) = seeded().await;

    let mut query = Some(SimpleQuery::new().order_by("age", Direction::Asc).limit(2));
    let mut pages = 0;
    let mut seen = Vec::new();
    while let Some(q) = query {
        let page = people.query(&q).await.unwrap();
        pages += 1;
        seen.extend(page.ids().into_iter().map(String::from));
        query = page.next_query;
    }

    assert_eq!(pages, 3);
    assert_eq!(seen, vec!["p3", "p2", "p4", "p1", "p5"]);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 5);
}

/// A short page reports no next page.
#[tokio::test]
async fn test_short_page_has_no_next() {
    let (_store, people) = seeded().await;
    let page = people
        .query(&SimpleQuery::new().filter("age", WhereOp::Gt, 30).limit(5))
        .await
        .unwrap();
    assert_eq!(page.len(), 3);
    assert!(page.next_query.is_none());
}

/// The continuation id wins over a declared start cursor.
#[tokio::test]
async fn test_continuation_overrides_start_cursor() {
    let (_store, people) = seeded().await;
    let first = people
        .query(
            &SimpleQuery::new()
                .order_by("age", Direction::Asc)
                .start_at(vec![json!(0)])
                .limit(2),
        )
        .await
        .unwrap();
    let next = first.next_query.clone().unwrap();
    assert_eq!(next.continuation_id.as_deref(), Some("p2"));

    let second = people.query(&next).await.unwrap();
    assert_eq!(names(&second.docs), vec!["Elaine", "Kevin"]);
}

/// A deleted anchor surfaces as a store error.
#[tokio::test]
async fn test_missing_anchor() {
    let (_store, people) = seeded().await;
    let first = people
        .query(&SimpleQuery::new().order_by("age", Direction::Asc).limit(2))
        .await
        .unwrap();
    people.delete("p2").await.unwrap();

    let err = people.query(&first.next_query.unwrap()).await.unwrap_err();
    assert!(matches!(err, LiftError::Store(StoreError::NotFound(_))));
}

// =============================================================================
// Filters & Cursors
// =============================================================================

/// End cursors bound the ordered range.
#[tokio::test]
async fn test_end_cursors() {
    let (_store, people) = seeded().await;
    let at = people
        .query(&SimpleQuery::new().order_by("age", Direction::Asc).end_at(vec![json!(33)]))
        .await
        .unwrap();
    assert_eq!(names(&at.docs), vec!["Hazel", "Henry", "Elaine"]);

    let before = people
        .query(&SimpleQuery::new().order_by("age", Direction::Asc).end_before(vec![json!(33)]))
        .await
        .unwrap();
    assert_eq!(names(&before.docs), vec!["Hazel", "Henry"]);
}

/// Nested where clauses address nested fields.
#[tokio::test]
async fn test_nested_where() {
    let (_store, people) = seeded().await;
    let query = SimpleQuery::new()
        .filter_nested(&json!({"favFoods": {"american": ["==", "burger"]}}))
        .unwrap()
        .order_by("age", Direction::Desc);

    let page = people.query(&query).await.unwrap();
    assert_eq!(names(&page.docs), vec!["Kevin", "Elaine"]);
}

/// `in` matches any listed value.
#[tokio::test]
async fn test_in_filter() {
    let (_store, people) = seeded().await;
    let page = people
        .query(
            &SimpleQuery::new()
                .filter("name", WhereOp::In, json!(["Bob", "Hazel", "Nobody"]))
                .order_by("name", Direction::Asc),
        )
        .await
        .unwrap();
    assert_eq!(names(&page.docs), vec!["Bob", "Hazel"]);
}

/// Conflicting cursors are rejected before the store is queried.
#[tokio::test]
async fn test_conflicting_cursors() {
    let (_store, people) = seeded().await;
    let err = people
        .query(
            &SimpleQuery::new()
                .start_at(vec![json!(1)])
                .start_after(vec![json!(1)]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LiftError::InvalidQuery(_)));
}

/// A continuation id also overrides conflicting start cursors.
#[tokio::test]
async fn test_continuation_ignores_conflicting_cursors() {
    let (_store, people) = seeded().await;
    let mut query = SimpleQuery::new()
        .order_by("age", Direction::Asc)
        .start_at(vec![json!(0)])
        .start_after(vec![json!(0)])
        .limit(2);
    query.continuation_id = Some("p2".to_string());

    let page = people.query(&query).await.unwrap();
    assert_eq!(names(&page.docs), vec!["Elaine", "Kevin"]);
}

/// Read failures propagate.
#[tokio::test]
async fn test_read_failure() {
    let (store, people) = seeded().await;
    store.fail_next_read(StoreError::Unavailable("offline".to_string()));
    assert!(people.query(&SimpleQuery::new()).await.is_err());
    assert_eq!(people.query(&SimpleQuery::new()).await.unwrap().len(), 5);
}

// =============================================================================
// Multi-Query
// =============================================================================

fn overlapping() -> Vec<SimpleQuery> {
    vec![
        SimpleQuery::new().filter("age", WhereOp::Gt, 30),
        SimpleQuery::new().filter("age", WhereOp::Lt, 40),
    ]
}

/// Without a merge process results are concatenated in query order.
#[tokio::test]
async fn test_multi_query_concatenates() {
    let (_store, people) = seeded().await;
    let rs = people
        .multi_query(&overlapping(), &MergeProcess::default())
        .await
        .unwrap();
    assert_eq!(rs.len(), 7);
    assert!(rs.next_query.is_none());
}

/// Dedupe keeps each id once; the sort applies regardless of query order.
#[tokio::test]
async fn test_multi_query_dedupe_and_sort() {
    let (_store, people) = seeded().await;
    let process = MergeProcess::dedupe().sorted_by("age", Direction::Desc);

    let rs = people.multi_query(&overlapping(), &process).await.unwrap();
    assert_eq!(names(&rs.docs), vec!["Bob", "Kevin", "Elaine", "Henry", "Hazel"]);

    let mut reversed = overlapping();
    reversed.reverse();
    let again = people.multi_query(&reversed, &process).await.unwrap();
    assert_eq!(again.ids(), rs.ids());
}

/// No queries means an empty result.
#[tokio::test]
async fn test_multi_query_without_queries() {
    let (_store, people) = seeded().await;
    let rs = people.multi_query(&[], &MergeProcess::dedupe()).await.unwrap();
    assert!(rs.is_empty());
}

/// Positional multi-get, `None` for missing ids.
#[tokio::test]
async fn test_get_docs() {
    let (_store, people) = seeded().await;
    let docs = people.get_docs(&["p4", "missing", "p1"]).await.unwrap();
    let found: Vec<Option<&str>> = docs
        .iter()
        .map(|d| d.as_ref().map(|p| p.name.as_str()))
        .collect();
    assert_eq!(found, vec![Some("Elaine"), None, Some("Kevin")]);
    assert_eq!(people.stats().docs_fetched, 3);
}
