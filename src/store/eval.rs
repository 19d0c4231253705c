//! Query evaluation for in-process stores
//!
//! Filters, orders and bounds documents the way the remote store does:
//! inequality predicates only match values of the same type, documents
//! lacking an ordered field are excluded, and the document id breaks ties.

use std::cmp::Ordering;

use serde_json::Value;

use super::{Direction, DocumentSnapshot, EndBound, FieldFilter, StartBound, StoreQuery, WhereOp};
use crate::value::FieldPath;

/// Runs `query` over `docs` (any order) and returns the matching page
pub fn execute(query: &StoreQuery, docs: impl IntoIterator<Item = DocumentSnapshot>) -> Vec<DocumentSnapshot> {
    let order = effective_order(query);

    let mut rows: Vec<(Vec<Value>, DocumentSnapshot)> = docs
        .into_iter()
        .filter_map(|snap| {
            let body = snap.to_value();
            if !query.filters.iter().all(|f| matches_filter(&body, f)) {
                return None;
            }
            let key = order
                .iter()
                .map(|(path, _)| path.get(&body).cloned())
                .collect::<Option<Vec<_>>>()?;
            Some((key, snap))
        })
        .collect();

    rows.sort_by(|(ka, a), (kb, b)| compare_rows(&order, ka, &a.id, kb, &b.id));

    rows.into_iter()
        .filter(|(key, snap)| within_start(&order, key, &snap.id, query.start.as_ref()))
        .filter(|(key, _)| within_end(&order, key, query.end.as_ref()))
        .map(|(_, snap)| snap)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect()
}

/// Declared ordering, or the first inequality field when none is declared
pub fn effective_order(query: &StoreQuery) -> Vec<(FieldPath, Direction)> {
    if !query.order_by.is_empty() {
        return query.order_by.clone();
    }
    query
        .filters
        .iter()
        .find(|f| f.op.is_inequality())
        .map(|f| vec![(f.path.clone(), Direction::Asc)])
        .unwrap_or_default()
}

/// Checks a single predicate against a document body
pub fn matches_filter(doc: &Value, filter: &FieldFilter) -> bool {
    let actual = match filter.path.get(doc) {
        Some(v) => v,
        None => return false,
    };

    match filter.op {
        WhereOp::Eq => actual == &filter.value,
        WhereOp::In => filter
            .value
            .as_array()
            .map(|candidates| candidates.contains(actual))
            .unwrap_or(false),
        op => {
            if type_rank(actual) != type_rank(&filter.value) {
                return false;
            }
            let ord = compare_values(actual, &filter.value);
            match op {
                WhereOp::Lt => ord == Ordering::Less,
                WhereOp::Lte => ord != Ordering::Greater,
                WhereOp::Gt => ord == Ordering::Greater,
                WhereOp::Gte => ord != Ordering::Less,
                WhereOp::Eq | WhereOp::In => false,
            }
        }
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values.
///
/// null < bool < number < string < array < object; same types compare
/// naturally, arrays element-wise, objects are equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
                return xi.cmp(&yi);
            }
            let xf = x.as_f64().unwrap_or(0.0);
            let yf = y.as_f64().unwrap_or(0.0);
            xf.partial_cmp(&yf).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| compare_values(l, r))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => Ordering::Equal,
    }
}

fn directed(ord: Ordering, dir: Direction) -> Ordering {
    match dir {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

fn id_direction(order: &[(FieldPath, Direction)]) -> Direction {
    order.last().map(|(_, d)| *d).unwrap_or_default()
}

fn compare_rows(
    order: &[(FieldPath, Direction)],
    ka: &[Value],
    ida: &str,
    kb: &[Value],
    idb: &str,
) -> Ordering {
    compare_prefix(order, ka, kb)
        .then_with(|| directed(ida.cmp(idb), id_direction(order)))
}

/// Compares a row key against a cursor over the cursor's length
fn compare_prefix(order: &[(FieldPath, Direction)], key: &[Value], cursor: &[Value]) -> Ordering {
    order
        .iter()
        .zip(key.iter().zip(cursor.iter()))
        .map(|((_, dir), (k, c))| directed(compare_values(k, c), *dir))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn within_start(
    order: &[(FieldPath, Direction)],
    key: &[Value],
    id: &str,
    bound: Option<&StartBound>,
) -> bool {
    match bound {
        None => true,
        Some(StartBound::At(cursor)) => compare_prefix(order, key, cursor) != Ordering::Less,
        Some(StartBound::After(cursor)) => compare_prefix(order, key, cursor) == Ordering::Greater,
        Some(StartBound::AfterDocument(anchor)) => {
            let body = anchor.to_value();
            let anchor_key: Vec<Value> = order
                .iter()
                .map(|(path, _)| path.get(&body).cloned().unwrap_or(Value::Null))
                .collect();
            compare_rows(order, key, id, &anchor_key, &anchor.id) == Ordering::Greater
        }
    }
}

fn within_end(order: &[(FieldPath, Direction)], key: &[Value], bound: Option<&EndBound>) -> bool {
    match bound {
        None => true,
        Some(EndBound::At(cursor)) => compare_prefix(order, key, cursor) != Ordering::Greater,
        Some(EndBound::Before(cursor)) => compare_prefix(order, key, cursor) == Ordering::Less,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(id: &str, body: Value) -> DocumentSnapshot {
        DocumentSnapshot {
            id: id.to_string(),
            data: body.as_object().cloned(),
        }
    }

    fn people() -> Vec<DocumentSnapshot> {
        vec![
            snap("kevin", json!({"age": 36, "name": "Kevin"})),
            snap("henry", json!({"age": 3, "name": "Henry"})),
            snap("karoline", json!({"age": 33, "name": "Karoline"})),
            snap("elaine", json!({"age": 5, "name": "Elaine"})),
            snap("hazel", json!({"age": 1, "name": "Hazel"})),
        ]
    }

    fn ids(docs: &[DocumentSnapshot]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_no_type_coercion() {
        let doc = json!({"value": 123});
        let filter = FieldFilter {
            path: FieldPath::parse("value"),
            op: WhereOp::Gte,
            value: json!("100"),
        };
        assert!(!matches_filter(&doc, &filter));
    }

    #[test]
    fn test_inequality_orders_by_field() {
        let query = StoreQuery::new("person").filter(FieldPath::parse("age"), WhereOp::Lte, json!(5));
        let result = execute(&query, people());
        assert_eq!(ids(&result), vec!["hazel", "henry", "elaine"]);
    }

    #[test]
    fn test_in_filter() {
        let query = StoreQuery::new("person").filter(
            FieldPath::parse("name"),
            WhereOp::In,
            json!(["Hazel", "Kevin"]),
        );
        let mut result = ids(&execute(&query, people()))
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        result.sort();
        assert_eq!(result, vec!["hazel", "kevin"]);
    }

    #[test]
    fn test_desc_order_with_cursors() {
        let query = StoreQuery::new("person")
            .order_by(FieldPath::parse("age"), Direction::Desc)
            .start(StartBound::After(vec![json!(36)]))
            .end(EndBound::At(vec![json!(3)]));
        let result = execute(&query, people());
        assert_eq!(ids(&result), vec!["karoline", "elaine", "henry"]);
    }

    #[test]
    fn test_after_document_and_limit() {
        let all = people();
        let anchor = all[3].clone(); // elaine, age 5
        let query = StoreQuery::new("person")
            .order_by(FieldPath::parse("age"), Direction::Asc)
            .start(StartBound::AfterDocument(anchor))
            .limit(2);
        let result = execute(&query, all);
        assert_eq!(ids(&result), vec!["karoline", "kevin"]);
    }

    #[test]
    fn test_missing_order_field_excluded() {
        let mut docs = people();
        docs.push(snap("ghost", json!({"name": "Ghost"})));
        let query = StoreQuery::new("person").order_by(FieldPath::parse("age"), Direction::Asc);
        assert_eq!(execute(&query, docs).len(), 5);
    }

    #[test]
    fn test_compare_values_type_order() {
        assert_eq!(compare_values(&json!(null), &json!(false)), Ordering::Less);
        assert_eq!(compare_values(&json!(10), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
    }
}
