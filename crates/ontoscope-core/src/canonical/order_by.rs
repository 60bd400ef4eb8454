use super::{CanonicalCache, Canonicalizer};
use crate::model::OrderBy;

/// Canonicalizes orderings. Property order is significant and preserved.
#[derive(Default)]
pub struct OrderByCanonicalizer {
    cache: CanonicalCache<OrderBy, OrderBy>,
}

impl OrderByCanonicalizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Canonicalizer for OrderByCanonicalizer {
    type Input = OrderBy;
    type Output = OrderBy;

    fn cache(&self) -> &CanonicalCache<OrderBy, OrderBy> {
        &self.cache
    }

    fn normalize(&self, input: &OrderBy) -> OrderBy {
        input.clone()
    }

    fn fingerprint(&self, normalized: &OrderBy) -> String {
        normalized
            .iter()
            .map(|(property, direction)| {
                serde_json::json!([property, direction.as_ref()]).to_string()
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}
