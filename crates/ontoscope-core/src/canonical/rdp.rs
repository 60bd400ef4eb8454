use super::{CanonicalCache, Canonicalizer};
use crate::model::RdpConfig;

/// Canonicalizes derived property configs. The config map is key-sorted,
/// so its JSON rendering is already a stable fingerprint.
#[derive(Default)]
pub struct RdpCanonicalizer {
    cache: CanonicalCache<RdpConfig, RdpConfig>,
}

impl RdpCanonicalizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Canonicalizer for RdpCanonicalizer {
    type Input = RdpConfig;
    type Output = RdpConfig;

    fn cache(&self) -> &CanonicalCache<RdpConfig, RdpConfig> {
        &self.cache
    }

    fn normalize(&self, input: &RdpConfig) -> RdpConfig {
        input.clone()
    }

    fn fingerprint(&self, normalized: &RdpConfig) -> String {
        serde_json::to_string(&normalized.0).unwrap_or_default()
    }
}
