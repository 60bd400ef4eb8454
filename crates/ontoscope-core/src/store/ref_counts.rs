use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::cache_key::CacheKey;

#[derive(Debug)]
struct RefState {
    count: usize,
    /// When the count last dropped to zero.
    released_at: Option<Instant>,
}

/// Explicit reference counts for cache keys.
///
/// A key that reaches zero is not collected immediately; it becomes
/// eligible once it has stayed at zero for the grace period.
#[derive(Default)]
pub struct RefCounts {
    counts: HashMap<CacheKey, RefState>,
}

impl RefCounts {
    /// Start tracking a freshly minted key at zero references.
    pub fn register(&mut self, key: &CacheKey, now: Instant) {
        self.counts.entry(key.clone()).or_insert(RefState {
            count: 0,
            released_at: Some(now),
        });
    }

    pub fn retain(&mut self, key: &CacheKey) -> usize {
        let state = self.counts.entry(key.clone()).or_insert(RefState {
            count: 0,
            released_at: None,
        });
        state.count += 1;
        state.released_at = None;
        state.count
    }

    /// Drop one reference. Returns `true` when the key reached zero.
    pub fn release(&mut self, key: &CacheKey, now: Instant) -> bool {
        let Some(state) = self.counts.get_mut(key) else {
            return false;
        };
        state.count = state.count.saturating_sub(1);
        if state.count == 0 && state.released_at.is_none() {
            state.released_at = Some(now);
            return true;
        }
        false
    }

    pub fn count(&self, key: &CacheKey) -> usize {
        self.counts.get(key).map_or(0, |s| s.count)
    }

    /// Keys that have been unreferenced for at least `delay`. They are
    /// removed from tracking.
    pub fn take_expired(&mut self, now: Instant, delay: Duration) -> Vec<CacheKey> {
        let expired: Vec<CacheKey> = self
            .counts
            .iter()
            .filter(|(_, s)| {
                s.count == 0
                    && s.released_at
                        .is_some_and(|t| now.saturating_duration_since(t) >= delay)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.counts.remove(key);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
