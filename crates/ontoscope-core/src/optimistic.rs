// ── Optimistic updates ──
//
// An action can describe the edits it expects to make. They are written
// to a fresh optimistic layer before the request goes out, and the layer
// is dropped again when the server answers or the action is abandoned.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::ClientInner;
use crate::model::{ObjectData, ObjectRef, PrimaryKey};
use crate::query::list;
use crate::store::{ChangeOrigin, LayerHandle, Status};

#[derive(Debug, Clone)]
enum Edit {
    Upsert(ObjectData),
    Delete(ObjectRef),
}

/// Edits to show while an action is in flight.
#[derive(Debug, Clone, Default)]
pub struct OptimisticUpdate {
    edits: Vec<Edit>,
}

impl OptimisticUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show `object` in place of the cached version.
    pub fn update_object(mut self, object: ObjectData) -> Self {
        self.edits.push(Edit::Upsert(object));
        self
    }

    /// Show a new object built from its properties.
    pub fn create_object(
        mut self,
        object_type: impl Into<String>,
        primary_key: impl Into<PrimaryKey>,
        properties: Map<String, Value>,
    ) -> Self {
        let mut object = ObjectData::new(object_type, primary_key);
        object.properties = properties;
        self.edits.push(Edit::Upsert(object));
        self
    }

    /// Hide an object as if deleted.
    pub fn delete_object(mut self, object_type: impl Into<String>, primary_key: impl Into<PrimaryKey>) -> Self {
        self.edits
            .push(Edit::Delete(ObjectRef::new(object_type, primary_key)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}

/// An applied optimistic layer. Dropping the guard rolls the layer back;
/// [`disarm`](Self::disarm) hands it over for commit instead.
pub(crate) struct LayerGuard {
    inner: Arc<ClientInner>,
    handle: Option<LayerHandle>,
}

impl LayerGuard {
    /// Push a layer and write `update` into it. Returns `None` (and the
    /// action runs without optimistic data) when the layer cap is reached.
    pub fn apply(inner: &Arc<ClientInner>, action: &str, update: OptimisticUpdate) -> Option<Self> {
        let handle = inner.store.lock().layers.push_optimistic();
        let Some(handle) = handle else {
            warn!(
                action,
                max = inner.config.max_optimistic_layers,
                "optimistic layer limit reached; applying without optimistic update"
            );
            return None;
        };
        let layer = handle.id();
        debug!(action, %layer, edits = update.edits.len(), "applying optimistic update");

        inner.store.batch(Some(layer), ChangeOrigin::Other, |batch| {
            for edit in update.edits {
                match edit {
                    Edit::Upsert(object) => {
                        let key = batch.state_mut().object_key(&object.object_type, &object.primary_key);
                        batch.retain_for_layer(&key);
                        batch.write_object(&key, Arc::new(object), Status::Loading);
                    }
                    Edit::Delete(object_ref) => {
                        let key = batch
                            .state_mut()
                            .object_key(&object_ref.object_type, &object_ref.primary_key);
                        batch.retain_for_layer(&key);
                        batch.write_tombstone(&key, Status::Loading);
                    }
                }
            }
            list::reevaluate_lists(batch);
        });

        Some(Self {
            inner: Arc::clone(inner),
            handle: Some(handle),
        })
    }

    /// Take the layer out of the guard so it is not rolled back.
    pub fn disarm(mut self) -> Option<LayerHandle> {
        self.handle.take()
    }
}

impl Drop for LayerGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let layer = handle.id();
        debug!(%layer, "rolling back optimistic layer");
        self.inner.store.batch(None, ChangeOrigin::Other, |batch| {
            batch.rollback_layer(handle);
            list::forget_guesses(batch.state_mut(), layer);
        });
        self.inner.maybe_gc();
    }
}
