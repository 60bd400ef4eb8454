use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::time::Instant;

use super::cache_key::CacheKey;
use super::changes::{ChangeOrigin, Changes};
use super::entry::{CacheValue, Entry, Status};
use super::layers::{LayerHandle, LayerRef, OptimisticId};
use super::StoreState;
use crate::error::CoreError;
use crate::model::ObjectData;

/// One critical section of writes against a single layer.
///
/// Writes go to the truth layer, or to one optimistic layer. Subjects are
/// only notified in [`finish`](Self::finish), once per key, so a batch
/// that writes a key several times still emits a single value.
pub(crate) struct Batch<'a> {
    state: &'a mut StoreState,
    layer: Option<OptimisticId>,
    /// Visible entry of each written key before its first write.
    touched: HashMap<CacheKey, Option<Arc<Entry>>>,
    changes: Changes,
}

impl<'a> Batch<'a> {
    pub(super) fn new(state: &'a mut StoreState, layer: Option<OptimisticId>, origin: ChangeOrigin) -> Self {
        Self {
            state,
            layer,
            touched: HashMap::new(),
            changes: Changes {
                origin,
                ..Changes::default()
            },
        }
    }

    pub fn state(&self) -> &StoreState {
        &*self.state
    }

    pub fn state_mut(&mut self) -> &mut StoreState {
        &mut *self.state
    }

    pub fn layer(&self) -> Option<OptimisticId> {
        self.layer
    }

    pub fn is_optimistic(&self) -> bool {
        self.layer.is_some()
    }

    pub fn changes(&self) -> &Changes {
        &self.changes
    }

    pub fn changes_mut(&mut self) -> &mut Changes {
        &mut self.changes
    }

    fn layer_ref(&self) -> LayerRef {
        self.layer.map_or(LayerRef::Truth, LayerRef::Optimistic)
    }

    /// Entry as seen by this batch's layer.
    pub fn read(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.state.layers.get(self.layer_ref(), key).cloned()
    }

    pub fn read_top(&self, key: &CacheKey) -> Option<Arc<Entry>> {
        self.state.layers.top(key).cloned()
    }

    fn touch(&mut self, key: &CacheKey) {
        if !self.touched.contains_key(key) {
            let before = self.read_top(key);
            self.touched.insert(key.clone(), before);
        }
    }

    pub fn write(&mut self, key: &CacheKey, value: Option<CacheValue>, status: Status) -> Arc<Entry> {
        self.write_entry(Entry::new(key.clone(), value, status))
    }

    fn write_entry(&mut self, entry: Entry) -> Arc<Entry> {
        let key = entry.cache_key.clone();
        self.touch(&key);
        let entry = Arc::new(entry);
        self.state.layers.set(self.layer_ref(), key, Arc::clone(&entry));
        entry
    }

    /// Mark the key failed, keeping whatever value it held.
    pub fn write_error(&mut self, key: &CacheKey, error: Arc<CoreError>) -> Arc<Entry> {
        let value = self.read(key).and_then(|e| e.value.clone());
        self.write_entry(Entry::new(key.clone(), value, Status::Error).with_error(error))
    }

    /// Write object data, recording it as added or modified.
    ///
    /// Data structurally equal to the current value keeps the existing
    /// allocation, so unchanged objects never look changed downstream.
    pub fn write_object(&mut self, key: &CacheKey, object: Arc<ObjectData>, status: Status) -> Arc<Entry> {
        let existing = self.read(key);
        let current = existing.as_ref().and_then(|e| e.object().cloned());

        if let (Some(existing), Some(current)) = (&existing, &current) {
            if **current == *object {
                if existing.status == status && existing.error.is_none() {
                    return Arc::clone(existing);
                }
                return self.write(key, Some(CacheValue::Object(Arc::clone(current))), status);
            }
        }

        let entry = self.write(key, Some(CacheValue::Object(Arc::clone(&object))), status);
        if current.is_some() {
            self.changes.modified.push((key.clone(), object));
        } else {
            self.changes.added.push((key.clone(), object));
        }
        entry
    }

    /// Record the object as deleted.
    pub fn write_tombstone(&mut self, key: &CacheKey, status: Status) -> Arc<Entry> {
        let entry = self.write(key, Some(CacheValue::Tombstone), status);
        self.changes.deleted.push(key.clone());
        entry
    }

    /// Keep `key` alive for as long as this batch's optimistic layer.
    pub fn retain_for_layer(&mut self, key: &CacheKey) {
        if let Some(id) = self.layer {
            self.state.ref_counts.retain(key);
            self.state.layer_retains.entry(id).or_default().push(key.clone());
        }
    }

    /// Fold confirmed entries into truth and drop the layer.
    pub fn commit_layer(&mut self, handle: LayerHandle, confirmed: Vec<Arc<Entry>>) {
        let id = handle.id();
        for key in self.state.layers.keys_in(id) {
            self.touch(&key);
        }
        for entry in &confirmed {
            self.touch(&entry.cache_key);
        }
        let _ = self.state.layers.commit(handle, confirmed);
        self.release_layer_retains(id);
    }

    /// Drop the layer; its keys revert to the layers beneath.
    pub fn rollback_layer(&mut self, handle: LayerHandle) {
        let id = handle.id();
        for key in self.state.layers.keys_in(id) {
            self.touch(&key);
        }
        let _ = self.state.layers.rollback(handle);
        self.release_layer_retains(id);
    }

    fn release_layer_retains(&mut self, id: OptimisticId) {
        let now = Instant::now();
        for key in self.state.layer_retains.remove(&id).unwrap_or_default() {
            self.state.release(&key, now);
        }
    }

    /// Notify subscribers of every key whose visible payload changed.
    /// Lists whose member objects changed are woken too, even if their
    /// membership did not.
    pub(super) fn finish(self) {
        let Batch { state, touched, .. } = self;

        let mut published = HashSet::new();
        let mut changed_objects = HashSet::new();
        for (key, before) in &touched {
            let emitted = state
                .subjects
                .peek(key)
                .is_some_and(|subject| subject.next(state.subject_payload(key)));
            if emitted {
                published.insert(key.clone());
            }
            let after = state.layers.top(key);
            let changed = match (before, after) {
                (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
                (None, None) => false,
                _ => true,
            };
            if changed && !key.is_list() {
                changed_objects.insert(key.clone());
            }
        }

        if changed_objects.is_empty() {
            return;
        }
        for list_key in state.lists.keys() {
            if published.contains(list_key) {
                continue;
            }
            let Some(subject) = state.subjects.peek(list_key) else {
                continue;
            };
            let contains_changed = state
                .layers
                .top(list_key)
                .and_then(|e| e.list())
                .is_some_and(|l| l.members.iter().any(|m| changed_objects.contains(m)));
            if contains_changed {
                subject.notify(state.subject_payload(list_key));
            }
        }
    }
}
