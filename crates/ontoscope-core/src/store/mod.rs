// ── Layered reactive store ──
//
// All cache state for one client lives in `StoreState` behind a single
// mutex. Every event (fetch result, optimistic write, commit, rollback,
// cleanup) is applied inside one `Batch`, and subscribers are notified
// once, when the batch finishes.

mod batch;
mod cache_key;
mod changes;
mod entry;
mod layers;
mod rdp_storage;
mod ref_counts;
mod subjects;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

use crate::canonical::{
    Canonicalizer, IntersectCanonicalizer, OrderByCanonicalizer, RdpCanonicalizer,
    RidListCanonicalizer, WhereClauseCanonicalizer,
};
use crate::client::{ObserveLinksOptions, ObserveListOptions};
use crate::model::PrimaryKey;
use crate::query::list::{self, ListQuery};
use crate::query::object::ObjectQuery;

pub(crate) use batch::Batch;
pub use cache_key::{CacheKey, KeyParts, LinkKeyParts, ListKeyParts, ObjectKeyParts};
pub(crate) use cache_key::CacheKeys;
pub(crate) use changes::ChangeOrigin;
pub use entry::{CacheValue, Entry, ListData, Status};
pub use layers::{LayerChange, LayerHandle, LayerRef, Layers, OptimisticId};
pub use rdp_storage::RdpStorage;
pub use ref_counts::RefCounts;
pub use subjects::{Subject, SubjectPayload, SubjectReceiver, Subjects};

/// Everything guarded by the store mutex.
pub(crate) struct StoreState {
    pub layers: Layers,
    pub subjects: Subjects,
    pub keys: CacheKeys,
    pub ref_counts: RefCounts,
    pub rdp: RdpStorage,
    pub objects: HashMap<CacheKey, ObjectQuery>,
    pub lists: HashMap<CacheKey, ListQuery>,
    /// Keys each optimistic layer keeps alive until it resolves.
    pub layer_retains: HashMap<OptimisticId, Vec<CacheKey>>,
    /// Set when a release drops some key to zero references.
    pub gc_pending: bool,
}

impl StoreState {
    fn new(max_optimistic_layers: usize) -> Self {
        Self {
            layers: Layers::new(max_optimistic_layers),
            subjects: Subjects::default(),
            keys: CacheKeys::default(),
            ref_counts: RefCounts::default(),
            rdp: RdpStorage::default(),
            objects: HashMap::new(),
            lists: HashMap::new(),
            layer_retains: HashMap::new(),
            gc_pending: false,
        }
    }

    /// Intern a key, tracking it for cleanup when it is new.
    pub fn key(&mut self, parts: KeyParts) -> CacheKey {
        let (key, is_new) = self.keys.get(parts);
        if is_new {
            self.ref_counts.register(&key, Instant::now());
        }
        key
    }

    pub fn object_key(&mut self, object_type: &str, primary_key: &PrimaryKey) -> CacheKey {
        self.key(KeyParts::Object(ObjectKeyParts {
            object_type: object_type.to_owned(),
            primary_key: primary_key.clone(),
        }))
    }

    /// Payload subscribers of `key` see right now. Lists carry their
    /// members resolved at this moment, so a queued payload keeps showing
    /// what was visible when it was published.
    pub fn subject_payload(&self, key: &CacheKey) -> SubjectPayload {
        let mut payload = SubjectPayload::current(key, &self.layers);
        if let Some(members) = payload.entry.list() {
            payload.members = Some(Arc::new(list::resolve_members(self, key, members)));
        }
        payload
    }

    /// Drop one reference to `key`, flagging a pending sweep when it
    /// becomes unreferenced.
    pub fn release(&mut self, key: &CacheKey, now: Instant) -> bool {
        let released = self.ref_counts.release(key, now);
        self.gc_pending |= released;
        released
    }

    /// Clean up every key unreferenced for at least `delay`. Releasing a
    /// list's members can make them eligible too, so this repeats until
    /// nothing more expires.
    pub fn collect_garbage(&mut self, delay: Duration) -> Vec<CacheKey> {
        self.gc_pending = false;
        let mut cleaned = Vec::new();
        loop {
            let now = Instant::now();
            let expired = self.ref_counts.take_expired(now, delay);
            if expired.is_empty() {
                return cleaned;
            }
            let mut progressed = false;
            for key in expired {
                if self.cleanup(&key, now) {
                    cleaned.push(key);
                    progressed = true;
                }
            }
            if !progressed {
                return cleaned;
            }
        }
    }

    fn cleanup(&mut self, key: &CacheKey, now: Instant) -> bool {
        // Still visible through a pending optimistic layer; retry later.
        if self.layers.is_shadowed(key) {
            self.ref_counts.register(key, now);
            return false;
        }

        self.subjects.delete(key);
        self.keys.remove(key);
        if let Some(mut query) = self.objects.remove(key) {
            query.fetch.cancel();
        }
        if let Some(mut query) = self.lists.remove(key) {
            query.fetch.cancel();
            for member in query.members.drain() {
                self.release(&member, now);
            }
        }
        self.rdp.delete(key, None);
        self.layers.remove_truth(key);
        debug!(%key, "cleaned up cache key");
        true
    }
}

/// Shared store: state plus the canonicalizers that mint key parts.
pub(crate) struct Store {
    state: Mutex<StoreState>,
    where_clauses: Arc<WhereClauseCanonicalizer>,
    intersects: IntersectCanonicalizer,
    rids: RidListCanonicalizer,
    order_bys: OrderByCanonicalizer,
    rdps: RdpCanonicalizer,
}

impl Store {
    pub fn new(max_optimistic_layers: usize) -> Self {
        let where_clauses = Arc::new(WhereClauseCanonicalizer::new());
        Self {
            state: Mutex::new(StoreState::new(max_optimistic_layers)),
            intersects: IntersectCanonicalizer::new(Arc::clone(&where_clauses)),
            where_clauses,
            rids: RidListCanonicalizer::new(),
            order_bys: OrderByCanonicalizer::new(),
            rdps: RdpCanonicalizer::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock()
    }

    /// Run `f` as one batch against `layer` (truth when `None`), then
    /// notify subscribers of every key whose visible entry changed.
    pub fn batch<R>(
        &self,
        layer: Option<OptimisticId>,
        origin: ChangeOrigin,
        f: impl FnOnce(&mut Batch<'_>) -> R,
    ) -> R {
        let mut state = self.state.lock();
        let mut batch = Batch::new(&mut state, layer, origin);
        let result = f(&mut batch);
        batch.finish();
        result
    }

    pub fn where_clauses(&self) -> &WhereClauseCanonicalizer {
        &self.where_clauses
    }

    /// Canonicalize every descriptor of a list query into key parts.
    pub fn list_parts(&self, options: &ObserveListOptions) -> ListKeyParts {
        ListKeyParts {
            object_type: options.object_type.clone(),
            where_clause: self.where_clauses.canonicalize_shared(&options.where_clause),
            order_by: self.order_bys.canonicalize_shared(&options.order_by),
            rids: self.rids.canonicalize_optional(options.rids.as_ref()),
            intersect_with: self
                .intersects
                .canonicalize_optional(options.intersect_with.as_ref()),
            rdp: self.rdps.canonicalize_optional(options.with_properties.as_ref()),
        }
    }

    pub fn link_parts(&self, options: &ObserveLinksOptions) -> LinkKeyParts {
        LinkKeyParts {
            source_type: options.source_type.clone(),
            source_primary_key: options.source_primary_key.clone(),
            link_name: options.link_name.clone(),
            where_clause: self.where_clauses.canonicalize_shared(&options.where_clause),
            order_by: self.order_bys.canonicalize_shared(&options.order_by),
        }
    }
}
