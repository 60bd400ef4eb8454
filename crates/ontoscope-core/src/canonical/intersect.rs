use std::sync::Arc;

use super::{Canonical, CanonicalCache, Canonicalizer, WhereClauseCanonicalizer};
use crate::model::{IntersectWith, WhereClause};

/// Canonicalizes intersect-with lists.
///
/// Each nested where-clause is canonicalized first, so the fingerprint is
/// just the identities of the canonical clauses. Intersection is
/// commutative, so clauses are ordered by identity and deduplicated.
pub struct IntersectCanonicalizer {
    where_clauses: Arc<WhereClauseCanonicalizer>,
    cache: CanonicalCache<Vec<IntersectWith>, Vec<Canonical<WhereClause>>>,
}

impl IntersectCanonicalizer {
    pub fn new(where_clauses: Arc<WhereClauseCanonicalizer>) -> Self {
        Self {
            where_clauses,
            cache: CanonicalCache::new(),
        }
    }
}

impl Canonicalizer for IntersectCanonicalizer {
    type Input = Vec<IntersectWith>;
    type Output = Vec<Canonical<WhereClause>>;

    fn cache(&self) -> &CanonicalCache<Self::Input, Self::Output> {
        &self.cache
    }

    fn normalize(&self, input: &Vec<IntersectWith>) -> Self::Output {
        let mut clauses: Self::Output = input
            .iter()
            .map(|i| self.where_clauses.canonicalize_shared(&i.where_clause))
            .collect();
        clauses.sort_by_key(Canonical::addr);
        clauses.dedup();
        clauses
    }

    fn fingerprint(&self, normalized: &Self::Output) -> String {
        normalized
            .iter()
            .map(|c| format!("{:x}", c.addr()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intersect(value: serde_json::Value) -> IntersectWith {
        IntersectWith {
            where_clause: Arc::new(WhereClause::from_json(&value).unwrap()),
        }
    }

    #[test]
    fn nested_clauses_are_canonicalized_first() {
        let wc = Arc::new(WhereClauseCanonicalizer::new());
        let c = IntersectCanonicalizer::new(Arc::clone(&wc));

        let a = c.canonicalize(&vec![intersect(json!({ "x": 1, "y": 2 }))]);
        let b = c.canonicalize(&vec![intersect(json!({ "$and": [{ "y": 2 }, { "x": { "$eq": 1 } }] }))]);
        assert_eq!(a, b);
        assert_eq!(a[0], wc.canonicalize(&WhereClause::from_json(&json!({ "x": 1, "y": 2 })).unwrap()));
    }

    #[test]
    fn clause_order_is_irrelevant() {
        let c = IntersectCanonicalizer::new(Arc::new(WhereClauseCanonicalizer::new()));
        let a = c.canonicalize(&vec![intersect(json!({ "x": 1 })), intersect(json!({ "y": 1 }))]);
        let b = c.canonicalize(&vec![intersect(json!({ "y": 1 })), intersect(json!({ "x": 1 }))]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_clauses_differ() {
        let c = IntersectCanonicalizer::new(Arc::new(WhereClauseCanonicalizer::new()));
        let a = c.canonicalize(&vec![intersect(json!({ "x": 1 }))]);
        let b = c.canonicalize(&vec![intersect(json!({ "x": 2 }))]);
        let empty = c.canonicalize(&Vec::new());
        assert_ne!(a, b);
        assert_ne!(a, empty);
    }
}
