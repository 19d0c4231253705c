//! # Query Compiler & Pager
//!
//! Declarative queries, their lowering to store queries, continuation-based
//! pagination, fingerprints for live subscriptions and multi-query merging.

pub mod ast;
pub mod compiler;
pub mod fingerprint;
pub mod merge;

use std::sync::Arc;

use crate::store::DocumentSnapshot;

pub use ast::{OrderBy, SimpleQuery, Where};
pub use compiler::{compile, compile_anchored, next_page};
pub use fingerprint::{doc_fingerprint, query_fingerprint};
pub use merge::{merge_rows, MergeOrder, MergeProcess};

/// One page of query results
#[derive(Debug, Clone)]
pub struct QueryResultSet<T> {
    pub docs: Vec<Arc<T>>,
    /// Snapshots backing `docs`, same order
    pub raw_docs: Vec<DocumentSnapshot>,
    /// Present when the page was full
    pub next_query: Option<SimpleQuery>,
}

impl<T> QueryResultSet<T> {
    pub fn empty() -> Self {
        Self {
            docs: Vec::new(),
            raw_docs: Vec::new(),
            next_query: None,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.raw_docs.iter().map(|d| d.id.as_str()).collect()
    }
}

impl<T> Default for QueryResultSet<T> {
    fn default() -> Self {
        Self::empty()
    }
}
