//! Query compiler and pager
//!
//! Lowers a [`SimpleQuery`] to a [`StoreQuery`] and derives the next-page
//! query from a page of results.

use crate::error::{LiftError, LiftResult};
use crate::store::{
    DocRef, DocumentSnapshot, DocumentStore, EndBound, StartBound, StoreError, StoreQuery,
};

use super::ast::SimpleQuery;

/// Compiles everything except the continuation anchor
pub fn compile(query: &SimpleQuery, collection: &str) -> LiftResult<StoreQuery> {
    let mut compiled = StoreQuery::new(collection);

    for w in &query.filters {
        if w.path.is_empty() {
            return Err(LiftError::InvalidQuery("where clause with an empty path".to_string()));
        }
        compiled = compiled.filter(w.path.clone(), w.op, w.value.clone());
    }

    for o in &query.order_by {
        let path = o
            .field
            .path()
            .map_err(|e| LiftError::InvalidQuery(format!("orderBy: {}", e)))?;
        compiled = compiled.order_by(path, o.dir);
    }

    if let Some(limit) = query.limit {
        compiled = compiled.limit(limit);
    }

    compiled.start = match (&query.start_at, &query.start_after) {
        // the continuation anchor replaces both start cursors
        (Some(_), Some(_)) if query.continuation_id.is_some() => None,
        (Some(_), Some(_)) => {
            return Err(LiftError::InvalidQuery(
                "startAtValue and startAfterValue are mutually exclusive".to_string(),
            ))
        }
        (Some(values), None) => Some(StartBound::At(values.clone())),
        (None, Some(values)) => Some(StartBound::After(values.clone())),
        (None, None) => None,
    };

    compiled.end = match (&query.end_at, &query.end_before) {
        (Some(_), Some(_)) => {
            return Err(LiftError::InvalidQuery(
                "endAtValue and endBeforeValue are mutually exclusive".to_string(),
            ))
        }
        (Some(values), None) => Some(EndBound::At(values.clone())),
        (None, Some(values)) => Some(EndBound::Before(values.clone())),
        (None, None) => None,
    };

    Ok(compiled)
}

/// Compiles `query` and, if it carries a continuation id, anchors it strictly
/// after that document. The anchor overrides any declared start cursor.
pub async fn compile_anchored(
    store: &dyn DocumentStore,
    query: &SimpleQuery,
    collection: &str,
) -> LiftResult<StoreQuery> {
    let mut compiled = compile(query, collection)?;

    if let Some(anchor_id) = &query.continuation_id {
        let anchor = store.get(&DocRef::new(collection, anchor_id.as_str())).await?;
        if !anchor.exists() {
            return Err(StoreError::NotFound(format!(
                "pagination anchor {}/{} no longer exists",
                collection, anchor_id
            ))
            .into());
        }
        compiled.start = Some(StartBound::AfterDocument(anchor));
    }

    Ok(compiled)
}

/// The query for the following page, if `rows` filled the page
pub fn next_page(query: &SimpleQuery, rows: &[DocumentSnapshot]) -> Option<SimpleQuery> {
    let limit = query.limit.filter(|l| *l > 0)?;
    if rows.len() != limit {
        return None;
    }
    let last = rows.last()?;

    let mut next = query.clone();
    next.continuation_id = Some(last.id.clone());
    Some(next)
}
