use super::{CanonicalCache, Canonicalizer};

/// Canonicalizes RID lists as sets: sorted and deduplicated.
#[derive(Default)]
pub struct RidListCanonicalizer {
    cache: CanonicalCache<Vec<String>, Vec<String>>,
}

impl RidListCanonicalizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Canonicalizer for RidListCanonicalizer {
    type Input = Vec<String>;
    type Output = Vec<String>;

    fn cache(&self) -> &CanonicalCache<Vec<String>, Vec<String>> {
        &self.cache
    }

    fn normalize(&self, input: &Vec<String>) -> Vec<String> {
        let mut rids = input.clone();
        rids.sort_unstable();
        rids.dedup();
        rids
    }

    fn fingerprint(&self, normalized: &Vec<String>) -> String {
        // JSON array encoding cannot confuse ["a,b"] with ["a", "b"].
        serde_json::Value::from(normalized.clone()).to_string()
    }
}
