// ── Observable client ──
//
// The entry point for consumers. Owns the layered store, routes fetches
// through the wire layer, applies actions with optional optimistic
// updates, and hands out reactive observations of objects and lists.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::canonical::{Canonical, Canonicalizer};
use crate::config::StoreConfig;
use crate::error::CoreError;
use crate::model::{
    ActionDefinition, ActionResult, ActionValidation, IntersectWith, ObjectData, ObjectEdit,
    ObjectRef, OrderBy, PrimaryKey, RdpConfig, WhereClause,
};
use crate::optimistic::{LayerGuard, OptimisticUpdate};
use crate::query::list::{self, AutoFetchMore, ListQuery};
use crate::query::object::{self, ObjectQuery};
use crate::query::SharedFetch;
use crate::store::{
    CacheKey, ChangeOrigin, KeyParts, LayerHandle, ObjectKeyParts, Status, Store, StoreState,
};
use crate::stream::{ListObservation, ListPayload, ObjectObservation, ObjectPayload, Observer, Subscription};
use crate::wire::{WireClient, WireError};

// ── Options ──────────────────────────────────────────────────────

/// How an observation treats the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObserveMode {
    /// Fetch unless the cached value is fresh or already loading.
    #[default]
    Default,
    /// Always fetch.
    Force,
    /// Never fetch; show only what is cached.
    Offline,
}

#[derive(Debug, Clone, Default)]
pub struct ObserveObjectOptions {
    pub mode: ObserveMode,
    /// Properties to load. `None` loads all of them.
    pub select: Option<Vec<String>>,
}

/// Everything that identifies a list query, plus how to load it.
///
/// Descriptors are shared: passing the same `Arc` again (for example by
/// cloning these options) skips re-normalizing it.
#[derive(Debug, Clone)]
pub struct ObserveListOptions {
    pub object_type: String,
    pub where_clause: Arc<WhereClause>,
    pub order_by: Arc<OrderBy>,
    pub rids: Option<Arc<Vec<String>>>,
    pub intersect_with: Option<Arc<Vec<IntersectWith>>>,
    pub with_properties: Option<Arc<RdpConfig>>,
    pub page_size: Option<usize>,
    pub auto_fetch_more: AutoFetchMore,
    pub mode: ObserveMode,
}

impl ObserveListOptions {
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            where_clause: Arc::new(WhereClause::all()),
            order_by: Arc::new(OrderBy::new()),
            rids: None,
            intersect_with: None,
            with_properties: None,
            page_size: None,
            auto_fetch_more: AutoFetchMore::Off,
            mode: ObserveMode::Default,
        }
    }

    pub fn where_clause(mut self, where_clause: impl Into<Arc<WhereClause>>) -> Self {
        self.where_clause = where_clause.into();
        self
    }

    pub fn order_by(mut self, order_by: impl Into<Arc<OrderBy>>) -> Self {
        self.order_by = order_by.into();
        self
    }

    pub fn rids(mut self, rids: impl Into<Arc<Vec<String>>>) -> Self {
        self.rids = Some(rids.into());
        self
    }

    pub fn intersect_with(mut self, clauses: Vec<WhereClause>) -> Self {
        self.intersect_with = Some(Arc::new(
            clauses
                .into_iter()
                .map(|where_clause| IntersectWith {
                    where_clause: Arc::new(where_clause),
                })
                .collect(),
        ));
        self
    }

    pub fn with_properties(mut self, config: impl Into<Arc<RdpConfig>>) -> Self {
        self.with_properties = Some(config.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn auto_fetch_more(mut self, auto_fetch_more: AutoFetchMore) -> Self {
        self.auto_fetch_more = auto_fetch_more;
        self
    }

    pub fn mode(mut self, mode: ObserveMode) -> Self {
        self.mode = mode;
        self
    }
}

/// The objects one source object links to, optionally filtered and
/// ordered, plus how to load them.
#[derive(Debug, Clone)]
pub struct ObserveLinksOptions {
    pub source_type: String,
    pub source_primary_key: PrimaryKey,
    pub link_name: String,
    pub where_clause: Arc<WhereClause>,
    pub order_by: Arc<OrderBy>,
    pub page_size: Option<usize>,
    pub auto_fetch_more: AutoFetchMore,
    pub mode: ObserveMode,
}

impl ObserveLinksOptions {
    pub fn new(
        source_type: impl Into<String>,
        source_primary_key: impl Into<PrimaryKey>,
        link_name: impl Into<String>,
    ) -> Self {
        Self {
            source_type: source_type.into(),
            source_primary_key: source_primary_key.into(),
            link_name: link_name.into(),
            where_clause: Arc::new(WhereClause::all()),
            order_by: Arc::new(OrderBy::new()),
            page_size: None,
            auto_fetch_more: AutoFetchMore::Off,
            mode: ObserveMode::Default,
        }
    }

    pub fn where_clause(mut self, where_clause: impl Into<Arc<WhereClause>>) -> Self {
        self.where_clause = where_clause.into();
        self
    }

    pub fn order_by(mut self, order_by: impl Into<Arc<OrderBy>>) -> Self {
        self.order_by = order_by.into();
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn auto_fetch_more(mut self, auto_fetch_more: AutoFetchMore) -> Self {
        self.auto_fetch_more = auto_fetch_more;
        self
    }

    pub fn mode(mut self, mode: ObserveMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplyActionOptions {
    pub optimistic: Option<OptimisticUpdate>,
}

impl ApplyActionOptions {
    pub fn optimistic(update: OptimisticUpdate) -> Self {
        Self {
            optimistic: Some(update),
        }
    }
}

// ── ObservableClient ─────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ClientInner>`. All clones share one cache.
#[derive(Clone)]
pub struct ObservableClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub config: StoreConfig,
    pub store: Store,
    pub wire: Arc<dyn WireClient>,
    pub cancel: CancellationToken,
}

impl ObservableClient {
    pub fn new(wire: Arc<dyn WireClient>, config: StoreConfig) -> Self {
        let store = Store::new(config.max_optimistic_layers);
        Self {
            inner: Arc::new(ClientInner {
                config,
                store,
                wire,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// The interned form of `where_clause`. Structurally equal clauses
    /// (in any child order) return the same instance, and passing the
    /// same `Arc` again returns it without normalizing.
    pub fn canonicalize_where_clause(&self, where_clause: impl Into<Arc<WhereClause>>) -> Canonical<WhereClause> {
        self.inner
            .store
            .where_clauses()
            .canonicalize_shared(&where_clause.into())
    }

    // ── Observation ──────────────────────────────────────────────

    /// Observe one object. The first payload reflects whatever is cached;
    /// a fetch starts unless the cached value is fresh.
    pub fn observe_object(
        &self,
        object_type: &str,
        primary_key: impl Into<PrimaryKey>,
        options: ObserveObjectOptions,
    ) -> ObjectObservation {
        let primary_key = primary_key.into();
        let (key, receiver) = {
            let mut guard = self.inner.store.lock();
            let state = &mut *guard;
            let key = state.object_key(object_type, &primary_key);
            state.ref_counts.retain(&key);
            let query = state
                .objects
                .entry(key.clone())
                .or_insert_with(|| ObjectQuery::new(None));
            if options.select.is_some() {
                query.select.clone_from(&options.select);
            }
            let receiver = state.subjects.get(&key, &state.layers).subscribe();
            (key, receiver)
        };
        debug!(%key, mode = ?options.mode, "observing object");

        if options.mode != ObserveMode::Offline {
            object::revalidate(&self.inner, &key, options.mode == ObserveMode::Force);
        }
        ObjectObservation::new(Arc::clone(&self.inner), key, receiver)
    }

    /// Observe a list query. Lists with equal descriptors share one cache
    /// entry and one in-flight fetch.
    pub fn observe_list(&self, options: ObserveListOptions) -> ListObservation {
        let parts = KeyParts::List(self.inner.store.list_parts(&options));
        self.observe_members(parts, options.page_size, options.auto_fetch_more, options.mode)
    }

    /// Observe the objects a source object links to. Link queries with
    /// equal descriptors share one cache entry; the linked objects share
    /// their entries with every other observation.
    pub fn observe_links(&self, options: ObserveLinksOptions) -> ListObservation {
        let parts = KeyParts::Link(self.inner.store.link_parts(&options));
        self.observe_members(parts, options.page_size, options.auto_fetch_more, options.mode)
    }

    fn observe_members(
        &self,
        parts: KeyParts,
        page_size: Option<usize>,
        auto_fetch_more: AutoFetchMore,
        mode: ObserveMode,
    ) -> ListObservation {
        let page_size = page_size.unwrap_or(self.inner.config.default_page_size);
        let (key, receiver) = {
            let mut guard = self.inner.store.lock();
            let state = &mut *guard;
            let key = state.key(parts);
            state.ref_counts.retain(&key);
            state
                .lists
                .entry(key.clone())
                .or_insert_with(|| ListQuery::new(page_size, auto_fetch_more));
            let receiver = state.subjects.get(&key, &state.layers).subscribe();
            (key, receiver)
        };
        debug!(%key, ?mode, "observing list");

        if mode != ObserveMode::Offline {
            list::revalidate(&self.inner, &key, mode == ObserveMode::Force);
        }
        ListObservation::new(Arc::clone(&self.inner), key, receiver)
    }

    /// Callback form of [`observe_object`](Self::observe_object).
    pub fn subscribe_object(
        &self,
        object_type: &str,
        primary_key: impl Into<PrimaryKey>,
        options: ObserveObjectOptions,
        observer: impl Observer<ObjectPayload>,
    ) -> Subscription {
        self.observe_object(object_type, primary_key, options)
            .subscribe(observer)
    }

    /// Callback form of [`observe_list`](Self::observe_list).
    pub fn subscribe_list(&self, options: ObserveListOptions, observer: impl Observer<ListPayload>) -> Subscription {
        self.observe_list(options).subscribe(observer)
    }

    /// Callback form of [`observe_links`](Self::observe_links).
    pub fn subscribe_links(&self, options: ObserveLinksOptions, observer: impl Observer<ListPayload>) -> Subscription {
        self.observe_links(options).subscribe(observer)
    }

    // ── Actions ──────────────────────────────────────────────────

    /// Apply an action.
    ///
    /// With an optimistic update, observers see the expected edits at once.
    /// On success the server's results replace them; on failure (or if
    /// this future is dropped) they are rolled back. Errors are returned
    /// to the caller only.
    pub async fn apply_action(
        &self,
        action: &ActionDefinition,
        args: Value,
        options: ApplyActionOptions,
    ) -> Result<ActionResult, CoreError> {
        let layer = options
            .optimistic
            .filter(|update| !update.is_empty())
            .and_then(|update| LayerGuard::apply(&self.inner, &action.api_name, update));
        debug!(action = %action.api_name, optimistic = layer.is_some(), "applying action");

        let result = tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.inner.wire.apply_action(action, &args) => {
                result.map_err(|err| CoreError::action(&action.api_name, err))
            }
        };

        match result {
            Ok(result) => {
                let handle = layer.and_then(LayerGuard::disarm);
                self.inner.commit_action(handle, &result).await;
                info!(action = %action.api_name, edits = result.edits.len(), "action applied");
                Ok(result)
            }
            Err(err) => {
                warn!(action = %action.api_name, error = %err, "action failed");
                drop(layer);
                Err(err)
            }
        }
    }

    /// Ask the server whether `args` would be accepted, without applying.
    pub async fn validate_action(&self, action: &ActionDefinition, args: Value) -> Result<ActionValidation, CoreError> {
        self.inner
            .wire
            .validate_action(action, &args)
            .await
            .map_err(|err| match err {
                WireError::Unsupported(_) => CoreError::from(err),
                other => CoreError::action(&action.api_name, other),
            })
    }

    // ── Direct cache writes ──────────────────────────────────────

    /// Write object data straight into the cache as loaded truth.
    pub fn update_object(&self, object: ObjectData) {
        let follow_up = self.inner.store.batch(None, ChangeOrigin::Other, |batch| {
            let key = batch
                .state_mut()
                .object_key(&object.object_type, &object.primary_key);
            if let Some(query) = batch.state_mut().objects.get_mut(&key) {
                query.fetch.cancel();
            }
            batch.write_object(&key, Arc::new(object), Status::Loaded);
            list::reevaluate_lists(batch)
        });
        self.inner.revalidate_all(&follow_up);
    }

    // ── Invalidation ─────────────────────────────────────────────

    /// Refetch one object if it is observed, dropping its cached derived
    /// values.
    pub async fn invalidate_object(&self, object_type: &str, primary_key: impl Into<PrimaryKey>) {
        let parts = KeyParts::Object(ObjectKeyParts {
            object_type: object_type.to_owned(),
            primary_key: primary_key.into(),
        });
        let key = {
            let mut state = self.inner.store.lock();
            let key = state.keys.lookup(&parts).cloned();
            if let Some(key) = &key {
                state.rdp.invalidate(key, None);
            }
            key
        };
        if let Some(fetch) = key.and_then(|key| self.inner.revalidate(&key, true)) {
            fetch.await;
        }
    }

    /// Refetch every observed object and list of one type, and every
    /// observed link from or to that type.
    pub async fn invalidate_object_type(&self, object_type: &str) {
        let targets = self.inner.links_to(object_type);
        let keys = self
            .inner
            .observed_keys(|key| key.object_type() == object_type || targets.contains(key));
        debug!(object_type, count = keys.len(), "invalidating object type");
        self.inner.refetch(&keys).await;
    }

    /// Refetch everything that is observed.
    pub async fn invalidate_all(&self) {
        let keys = self.inner.observed_keys(|_| true);
        debug!(count = keys.len(), "invalidating all");
        self.inner.refetch(&keys).await;
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Clean up every key that has been unobserved for the configured
    /// delay. Returns how many keys were removed.
    pub fn gc(&self) -> usize {
        self.inner.gc()
    }

    /// Cancel every fetch and complete every observation.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut guard = self.inner.store.lock();
        let state = &mut *guard;
        let keys: Vec<CacheKey> = state.keys.iter().cloned().collect();
        for key in &keys {
            state.subjects.delete(key);
        }
        info!(keys = keys.len(), "observable client shut down");
    }
}

// ── ClientInner ──────────────────────────────────────────────────

impl ClientInner {
    pub(crate) fn revalidate(self: &Arc<Self>, key: &CacheKey, force: bool) -> Option<SharedFetch> {
        if key.is_list() {
            list::revalidate(self, key, force)
        } else {
            object::revalidate(self, key, force)
        }
    }

    /// Force a refetch of every key, e.g. lists whose membership could
    /// not be decided locally.
    pub(crate) fn revalidate_all(self: &Arc<Self>, keys: &[CacheKey]) {
        for key in keys {
            debug!(%key, "revalidating");
            self.revalidate(key, true);
        }
        self.maybe_gc();
    }

    async fn refetch(self: &Arc<Self>, keys: &[CacheKey]) {
        let fetches: Vec<SharedFetch> = keys
            .iter()
            .filter_map(|key| self.revalidate(key, true))
            .collect();
        join_all(fetches).await;
    }

    fn observed_keys(&self, filter: impl Fn(&CacheKey) -> bool) -> Vec<CacheKey> {
        let state = self.store.lock();
        state
            .objects
            .keys()
            .chain(state.lists.keys())
            .filter(|key| filter(key))
            .cloned()
            .collect()
    }

    /// Observed links currently showing an object of `object_type`.
    fn links_to(&self, object_type: &str) -> HashSet<CacheKey> {
        let state = self.store.lock();
        state
            .lists
            .keys()
            .filter(|key| key.as_link().is_some())
            .filter(|key| {
                state
                    .layers
                    .top(key)
                    .and_then(|e| e.list().cloned())
                    .is_some_and(|l| l.members.iter().any(|m| m.object_type() == object_type))
            })
            .cloned()
            .collect()
    }

    /// Drop one observer reference. The last one cancels the key's fetch
    /// and schedules cleanup.
    pub(crate) fn release(self: &Arc<Self>, key: &CacheKey) {
        let released = {
            let mut state = self.store.lock();
            let released = state.release(key, Instant::now());
            if released {
                if let Some(query) = state.objects.get_mut(key) {
                    query.fetch.cancel();
                }
                if let Some(query) = state.lists.get_mut(key) {
                    query.fetch.cancel();
                }
            }
            released
        };
        if released {
            debug!(%key, "last observer released");
            self.maybe_gc();
        }
    }

    /// Schedule a sweep if something became unreferenced since the last.
    pub(crate) fn maybe_gc(self: &Arc<Self>) {
        let pending = std::mem::take(&mut self.store.lock().gc_pending);
        if !pending {
            return;
        }
        let delay = self.config.gc_delay;
        if delay.is_zero() {
            self.gc();
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("no runtime for a delayed sweep; cleanup waits for the next gc()");
            return;
        };
        let inner = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        runtime.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.gc();
                    }
                }
            }
        });
    }

    fn gc(&self) -> usize {
        let cleaned = self.store.lock().collect_garbage(self.config.gc_delay);
        if !cleaned.is_empty() {
            debug!(count = cleaned.len(), "garbage collected cache keys");
        }
        cleaned.len()
    }

    /// Fold a successful action into truth and drop its optimistic layer,
    /// then refetch whatever the result leaves uncertain.
    ///
    /// Objects the action edited without returning their data keep their
    /// optimistic value until the refetch lands; only then is the layer
    /// dropped, so observers go straight from the guess to the server's
    /// value.
    async fn commit_action(self: &Arc<Self>, layer: Option<LayerHandle>, result: &ActionResult) {
        let revalidate_lists = self.config.revalidate_after_action;
        let (lists, objects, deferred) = self.store.batch(None, ChangeOrigin::Other, |batch| {
            for object in &result.objects {
                let key = batch
                    .state_mut()
                    .object_key(&object.object_type, &object.primary_key);
                if let Some(query) = batch.state_mut().objects.get_mut(&key) {
                    query.fetch.cancel();
                }
                batch.write_object(&key, Arc::new(object.clone()), Status::Loaded);
            }
            for edit in &result.edits {
                if let ObjectEdit::DeleteObject(object_ref) = edit {
                    let key = batch
                        .state_mut()
                        .object_key(&object_ref.object_type, &object_ref.primary_key);
                    if let Some(query) = batch.state_mut().objects.get_mut(&key) {
                        query.fetch.cancel();
                    }
                    batch.write_tombstone(&key, Status::Loaded);
                }
            }

            let objects = unreturned_edits(batch.state(), result);
            let mut lists: Vec<CacheKey> = Vec::new();
            let mut deferred = None;
            if let Some(handle) = layer {
                let id = handle.id();
                if revalidate_lists {
                    lists.extend(
                        batch
                            .state()
                            .lists
                            .iter()
                            .filter(|(_, q)| q.guessed.values().any(|l| *l == Some(id)))
                            .map(|(k, _)| k.clone()),
                    );
                }
                let shadowed = batch.state().layers.keys_in(id);
                if objects.iter().any(|k| shadowed.contains(k)) {
                    deferred = Some(handle);
                } else {
                    batch.commit_layer(handle, Vec::new());
                    list::settle_guesses(batch.state_mut(), id);
                }
            }
            lists.extend(list::reevaluate_lists(batch));

            if revalidate_lists {
                let types: HashSet<&str> = result
                    .edits
                    .iter()
                    .filter(|e| !matches!(e, ObjectEdit::ModifyObject(_)))
                    .map(|e| e.object_ref().object_type.as_str())
                    .collect();
                lists.extend(
                    batch
                        .state()
                        .lists
                        .keys()
                        .filter(|k| types.contains(k.object_type()))
                        .cloned(),
                );
            }
            (lists, objects, deferred)
        });

        let mut seen = HashSet::new();
        let lists: Vec<CacheKey> = lists.into_iter().filter(|k| seen.insert(k.clone())).collect();

        let Some(handle) = deferred else {
            self.revalidate_all(&objects);
            self.revalidate_all(&lists);
            return;
        };

        // Runs detached so the layer is still dropped if the caller stops
        // waiting.
        let fetches: Vec<SharedFetch> = objects
            .iter()
            .filter_map(|key| self.revalidate(key, true))
            .collect();
        let inner = Arc::clone(self);
        let settle = tokio::spawn(async move {
            join_all(fetches).await;
            inner.settle_layer(handle);
            inner.revalidate_all(&lists);
        });
        if let Err(err) = settle.await {
            warn!(error = %err, "optimistic layer settle task failed");
        }
    }

    /// Drop a committed action's layer once its refetches have landed.
    fn settle_layer(self: &Arc<Self>, handle: LayerHandle) {
        let layer = handle.id();
        debug!(%layer, "settling optimistic layer");
        self.store.batch(None, ChangeOrigin::Other, |batch| {
            batch.commit_layer(handle, Vec::new());
            list::settle_guesses(batch.state_mut(), layer);
        });
        self.maybe_gc();
    }
}

/// Observed objects an action edited without returning their data.
fn unreturned_edits(state: &StoreState, result: &ActionResult) -> Vec<CacheKey> {
    let returned: HashSet<ObjectRef> = result.objects.iter().map(ObjectData::object_ref).collect();
    result
        .edits
        .iter()
        .filter(|e| !matches!(e, ObjectEdit::DeleteObject(_)))
        .map(ObjectEdit::object_ref)
        .filter(|r| !returned.contains(*r))
        .filter_map(|r| {
            state.keys.lookup(&KeyParts::Object(ObjectKeyParts {
                object_type: r.object_type.clone(),
                primary_key: r.primary_key.clone(),
            }))
        })
        .filter(|k| state.objects.contains_key(*k))
        .cloned()
        .collect()
}
