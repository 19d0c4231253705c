//! Subscription fingerprints
//!
//! Hex SHA-256 over the subscription target. Two subscriptions share a
//! provider listener exactly when their fingerprints are equal.

use sha2::{Digest, Sha256};

use super::ast::SimpleQuery;
use crate::error::LiftResult;

fn digest(kind: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn doc_fingerprint(id: &str) -> String {
    digest("doc", id)
}

pub fn query_fingerprint(query: &SimpleQuery) -> LiftResult<String> {
    Ok(digest("query", &query.canonical_json()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WhereOp;

    #[test]
    fn test_doc_fingerprint_stable() {
        assert_eq!(doc_fingerprint("p1"), doc_fingerprint("p1"));
        assert_ne!(doc_fingerprint("p1"), doc_fingerprint("p2"));
        assert_eq!(doc_fingerprint("p1").len(), 64);
    }

    #[test]
    fn test_query_fingerprint() {
        let a = SimpleQuery::new().filter("age", WhereOp::Gt, 3);
        let b = SimpleQuery::new().filter("age", WhereOp::Gt, 3);
        let c = SimpleQuery::new().filter("age", WhereOp::Gt, 4);

        assert_eq!(query_fingerprint(&a).unwrap(), query_fingerprint(&b).unwrap());
        assert_ne!(query_fingerprint(&a).unwrap(), query_fingerprint(&c).unwrap());
    }
}
