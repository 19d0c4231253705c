//! Multi-query merge
//!
//! Rows from several queries are concatenated in query order, then
//! optionally deduplicated by document id and sorted by one key.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::store::eval::compare_values;
use crate::store::{Direction, DocumentSnapshot};
use crate::value::FieldPath;

/// Sort applied after concatenation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOrder {
    pub sort_key: FieldPath,
    #[serde(default)]
    pub dir: Direction,
}

/// How multi-query results are combined
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeProcess {
    #[serde(default)]
    pub order_by: Option<MergeOrder>,
    #[serde(default)]
    pub run_dedupe: bool,
}

impl MergeProcess {
    pub fn dedupe() -> Self {
        Self {
            order_by: None,
            run_dedupe: true,
        }
    }

    pub fn sorted_by(mut self, sort_key: &str, dir: Direction) -> Self {
        self.order_by = Some(MergeOrder {
            sort_key: FieldPath::parse(sort_key),
            dir,
        });
        self
    }
}

/// Applies `process` to concatenated rows. `raw` exposes each row's snapshot.
///
/// Dedupe keeps the first occurrence of an id. The sort is stable; rows with
/// equal keys keep their concatenation order in both directions, and rows
/// lacking the key sort after all others when ascending.
pub fn merge_rows<R, F>(rows: Vec<R>, process: &MergeProcess, raw: F) -> Vec<R>
where
    F: Fn(&R) -> &DocumentSnapshot,
{
    let mut rows = if process.run_dedupe {
        let mut seen = HashSet::new();
        rows.into_iter()
            .filter(|r| seen.insert(raw(r).id.clone()))
            .collect()
    } else {
        rows
    };

    if let Some(order) = &process.order_by {
        let mut keyed: Vec<(Option<serde_json::Value>, R)> = rows
            .into_iter()
            .map(|r| (order.sort_key.get(&raw(&r).to_value()).cloned(), r))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            let ord = match (a, b) {
                (Some(a), Some(b)) => compare_values(a, b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            match order.dir {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        });
        rows = keyed.into_iter().map(|(_, r)| r).collect();
    }

    rows
}
