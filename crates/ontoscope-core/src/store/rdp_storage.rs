// ── Derived property storage ──
//
// Secondary cache for runtime derived properties, keyed by object cache
// key and then by canonical RDP config. Config keys compare by pointer.

use std::collections::HashMap;

use super::cache_key::CacheKey;
use crate::canonical::Canonical;
use crate::model::{RdpConfig, RdpData};

#[derive(Default)]
pub struct RdpStorage {
    entries: HashMap<CacheKey, HashMap<Canonical<RdpConfig>, RdpData>>,
}

impl RdpStorage {
    pub fn get(&self, key: &CacheKey, config: &Canonical<RdpConfig>) -> Option<RdpData> {
        self.entries.get(key)?.get(config).cloned()
    }

    pub fn set(&mut self, key: CacheKey, config: Canonical<RdpConfig>, data: RdpData) {
        self.entries.entry(key).or_default().insert(config, data);
    }

    pub fn has(&self, key: &CacheKey, config: &Canonical<RdpConfig>) -> bool {
        self.entries.get(key).is_some_and(|m| m.contains_key(config))
    }

    /// Drop one config's data, or every config's data when `config` is
    /// `None`. Returns whether anything was removed.
    pub fn delete(&mut self, key: &CacheKey, config: Option<&Canonical<RdpConfig>>) -> bool {
        match config {
            None => self.entries.remove(key).is_some(),
            Some(config) => {
                let Some(configs) = self.entries.get_mut(key) else {
                    return false;
                };
                let removed = configs.remove(config).is_some();
                if configs.is_empty() {
                    self.entries.remove(key);
                }
                removed
            }
        }
    }

    /// Alias of [`delete`](Self::delete) used when data is known stale.
    pub fn invalidate(&mut self, key: &CacheKey, config: Option<&Canonical<RdpConfig>>) -> bool {
        self.delete(key, config)
    }

    pub fn get_all_rdp_configs(&self, key: &CacheKey) -> Vec<Canonical<RdpConfig>> {
        self.entries
            .get(key)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
