// ── Layered entry storage ──
//
// Index 0 is the truth layer holding server-confirmed entries. Each
// in-flight optimistic mutation owns one layer above it. Reads scan from
// the top down; nothing is merged eagerly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::cache_key::CacheKey;
use super::entry::Entry;

/// Identity of one optimistic layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptimisticId(Uuid);

impl OptimisticId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OptimisticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which layer to read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerRef {
    Truth,
    Top,
    Optimistic(OptimisticId),
}

/// Proof of ownership of a pushed layer. Consumed by commit or rollback.
#[derive(Debug)]
#[must_use = "an optimistic layer must be committed or rolled back"]
pub struct LayerHandle {
    id: OptimisticId,
}

impl LayerHandle {
    pub fn id(&self) -> OptimisticId {
        self.id
    }
}

/// A key whose top entry changed when a layer was removed.
#[derive(Debug, Clone)]
pub struct LayerChange {
    pub key: CacheKey,
    pub top: Option<Arc<Entry>>,
}

#[derive(Default)]
struct Layer {
    entries: HashMap<CacheKey, Arc<Entry>>,
}

pub struct Layers {
    truth: Layer,
    optimistic: Vec<(OptimisticId, Layer)>,
    max_optimistic: usize,
}

impl Layers {
    pub fn new(max_optimistic: usize) -> Self {
        Self {
            truth: Layer::default(),
            optimistic: Vec::new(),
            max_optimistic,
        }
    }

    pub fn get(&self, layer: LayerRef, key: &CacheKey) -> Option<&Arc<Entry>> {
        match layer {
            LayerRef::Truth => self.truth.entries.get(key),
            LayerRef::Top => self
                .optimistic
                .iter()
                .rev()
                .find_map(|(_, l)| l.entries.get(key))
                .or_else(|| self.truth.entries.get(key)),
            LayerRef::Optimistic(id) => self.read_from(id, key),
        }
    }

    pub fn top(&self, key: &CacheKey) -> Option<&Arc<Entry>> {
        self.get(LayerRef::Top, key)
    }

    pub fn truth(&self, key: &CacheKey) -> Option<&Arc<Entry>> {
        self.get(LayerRef::Truth, key)
    }

    /// Replace the entry for `key` in `layer`. `Top` writes into the
    /// highest layer. Returns `false` if the optimistic layer is gone.
    pub fn set(&mut self, layer: LayerRef, key: CacheKey, entry: Arc<Entry>) -> bool {
        let target = match layer {
            LayerRef::Truth => Some(&mut self.truth),
            LayerRef::Top => Some(
                self.optimistic
                    .last_mut()
                    .map_or(&mut self.truth, |(_, l)| l),
            ),
            LayerRef::Optimistic(id) => self
                .optimistic
                .iter_mut()
                .find(|(lid, _)| *lid == id)
                .map(|(_, l)| l),
        };
        match target {
            Some(l) => {
                l.entries.insert(key, entry);
                true
            }
            None => false,
        }
    }

    /// Remove the truth entry for a key being cleaned up.
    pub fn remove_truth(&mut self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.truth.entries.remove(key)
    }

    /// Whether any optimistic layer still holds an entry for `key`.
    pub fn is_shadowed(&self, key: &CacheKey) -> bool {
        self.optimistic.iter().any(|(_, l)| l.entries.contains_key(key))
    }

    pub fn push_optimistic(&mut self) -> Option<LayerHandle> {
        if self.optimistic.len() >= self.max_optimistic {
            return None;
        }
        let id = OptimisticId::new();
        self.optimistic.push((id, Layer::default()));
        Some(LayerHandle { id })
    }

    /// Write `confirmed` entries into truth, then drop the layer.
    pub fn commit(
        &mut self,
        handle: LayerHandle,
        confirmed: impl IntoIterator<Item = Arc<Entry>>,
    ) -> Vec<LayerChange> {
        let confirmed: Vec<Arc<Entry>> = confirmed.into_iter().collect();
        let keys = self.keys_in(handle.id);
        let before = self.snapshot_tops(confirmed.iter().map(|e| &e.cache_key));

        for entry in confirmed {
            self.truth.entries.insert(entry.cache_key.clone(), entry);
        }

        let mut changes = self.remove_layer(handle.id, &keys);
        for (key, old) in before {
            if keys.contains(&key) {
                continue;
            }
            let new = self.top(&key).cloned();
            if !same_entry(old.as_ref(), new.as_ref()) {
                changes.push(LayerChange { key, top: new });
            }
        }
        changes
    }

    /// Drop the layer; its keys fall back to whatever lies beneath.
    pub fn rollback(&mut self, handle: LayerHandle) -> Vec<LayerChange> {
        let keys = self.keys_in(handle.id);
        self.remove_layer(handle.id, &keys)
    }

    pub fn keys_in(&self, id: OptimisticId) -> Vec<CacheKey> {
        self.optimistic
            .iter()
            .find(|(lid, _)| *lid == id)
            .map(|(_, l)| l.entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.optimistic.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn read_from(&self, id: OptimisticId, key: &CacheKey) -> Option<&Arc<Entry>> {
        let idx = self.optimistic.iter().position(|(lid, _)| *lid == id)?;
        self.optimistic[..=idx]
            .iter()
            .rev()
            .find_map(|(_, l)| l.entries.get(key))
            .or_else(|| self.truth.entries.get(key))
    }

    fn snapshot_tops<'a>(
        &self,
        keys: impl Iterator<Item = &'a CacheKey>,
    ) -> Vec<(CacheKey, Option<Arc<Entry>>)> {
        keys.map(|k| (k.clone(), self.top(k).cloned())).collect()
    }

    fn remove_layer(&mut self, id: OptimisticId, keys: &[CacheKey]) -> Vec<LayerChange> {
        let before = self.snapshot_tops(keys.iter());
        self.optimistic.retain(|(lid, _)| *lid != id);
        before
            .into_iter()
            .filter_map(|(key, old)| {
                let new = self.top(&key).cloned();
                (!same_entry(old.as_ref(), new.as_ref())).then_some(LayerChange { key, top: new })
            })
            .collect()
    }
}

fn same_entry(a: Option<&Arc<Entry>>, b: Option<&Arc<Entry>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}
