use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::object::is_fresh;
use super::{FetchSlot, SharedFetch};
use crate::client::ClientInner;
use crate::error::CoreError;
use crate::filter::{compare_values, object_matches_where_clause};
use crate::canonical::Canonical;
use crate::model::{ObjectData, RdpConfig, SortDirection};
use crate::store::{
    Batch, CacheKey, CacheValue, ChangeOrigin, KeyParts, ListData, ListKeyParts, OptimisticId,
    RdpStorage, Status, StoreState,
};
use crate::wire::{LinkPageRequest, ListPage, ListPageRequest, WireClient, WireError};

/// How many pages a list query loads without being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoFetchMore {
    /// Only the first page.
    #[default]
    Off,
    /// Every page.
    All,
    /// Pages until at least this many objects are loaded.
    AtLeast(usize),
}

/// Fetch and membership state of one observed list or link.
pub(crate) struct ListQuery {
    pub page_size: usize,
    pub auto_fetch_more: AutoFetchMore,
    pub next_page_token: Option<String>,
    /// Truth-layer members; each holds one reference on its object key.
    pub members: HashSet<CacheKey>,
    /// Members added locally rather than by a fetch, with the optimistic
    /// layer that added them. A complete refetch confirms or refutes them.
    pub guessed: HashMap<CacheKey, Option<OptimisticId>>,
    pub fetch: FetchSlot,
}

impl ListQuery {
    pub fn new(page_size: usize, auto_fetch_more: AutoFetchMore) -> Self {
        Self {
            page_size,
            auto_fetch_more,
            next_page_token: None,
            members: HashSet::new(),
            guessed: HashMap::new(),
            fetch: FetchSlot::default(),
        }
    }

    pub fn has_more(&self) -> bool {
        self.next_page_token.is_some()
    }
}

// ── Matching and ordering ────────────────────────────────────────────

/// Whether `object` belongs in the list described by `parts`.
///
/// A list restricted to RIDs cannot decide membership for an object whose
/// RID is unknown; that is a non-strict match.
pub(crate) fn list_matches(parts: &ListKeyParts, object: &ObjectData, strict: bool) -> bool {
    if object.object_type != parts.object_type {
        return false;
    }
    if let Some(rids) = &parts.rids {
        match &object.rid {
            Some(rid) if rids.binary_search(rid).is_err() => return false,
            None if strict => return false,
            _ => {}
        }
    }
    object_matches_where_clause(object, &parts.where_clause, strict)
        && parts.intersect_with.as_ref().is_none_or(|clauses| {
            clauses
                .iter()
                .all(|clause| object_matches_where_clause(object, clause, strict))
        })
}

/// The object as this list sees it, with its derived properties.
fn with_derived(
    rdp: &RdpStorage,
    config: Option<&Canonical<RdpConfig>>,
    key: &CacheKey,
    object: &Arc<ObjectData>,
) -> Arc<ObjectData> {
    match config.and_then(|config| rdp.get(key, config)) {
        Some(derived) if !derived.is_empty() => Arc::new(object.merged_with(&derived)),
        _ => Arc::clone(object),
    }
}

/// Resolve member keys to their visible objects. Deleted and unloaded
/// members are skipped.
pub(crate) fn resolve_members(state: &StoreState, list_key: &CacheKey, list: &ListData) -> Vec<Arc<ObjectData>> {
    let config = list_key.rdp();
    list.members
        .iter()
        .filter_map(|member| {
            let object = state.layers.top(member)?.object()?;
            Some(with_derived(&state.rdp, config, member, object))
        })
        .collect()
}

fn compare_rows(a: &[Value], b: &[Value], directions: &[SortDirection]) -> Ordering {
    for ((x, y), direction) in a.iter().zip(b).zip(directions) {
        // Nulls sort last in either direction.
        let ordering = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let ordering = compare_values(x, y).unwrap_or(Ordering::Equal);
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Drop duplicate members and apply the list's ordering. The sort is
/// stable, so ties keep server order.
fn sort_members(batch: &Batch<'_>, list_key: &CacheKey, members: &mut Vec<CacheKey>) {
    let mut seen = HashSet::new();
    members.retain(|key| seen.insert(key.clone()));
    let Some(order_by) = list_key.order_by().filter(|o| !o.is_empty()) else {
        return;
    };

    let rows: HashMap<CacheKey, Vec<Value>> = members
        .iter()
        .map(|key| {
            let object = batch
                .read(key)
                .and_then(|e| e.object().cloned())
                .map(|o| with_derived(&batch.state().rdp, list_key.rdp(), key, &o));
            let row = order_by
                .iter()
                .map(|(property, _)| {
                    object
                        .as_ref()
                        .and_then(|o| o.get(property))
                        .unwrap_or(Value::Null)
                })
                .collect();
            (key.clone(), row)
        })
        .collect();
    let directions: Vec<SortDirection> = order_by.iter().map(|(_, d)| *d).collect();
    members.sort_by(|a, b| compare_rows(&rows[a], &rows[b], &directions));
}

// ── Writes ───────────────────────────────────────────────────────────

/// Move the truth-layer references of a list to its new member set.
fn retain_members(state: &mut StoreState, list_key: &CacheKey, members: &[CacheKey]) {
    let Some(query) = state.lists.get_mut(list_key) else {
        return;
    };
    let next: HashSet<CacheKey> = members.iter().cloned().collect();
    let previous = std::mem::replace(&mut query.members, next.clone());
    let now = Instant::now();
    for key in next.difference(&previous) {
        state.ref_counts.retain(key);
    }
    for key in previous.difference(&next) {
        state.release(key, now);
    }
}

/// Write a list's members in this batch's layer.
///
/// Members are deduplicated and sorted first. A write that changes
/// neither membership nor status is skipped.
pub(crate) fn write_list(batch: &mut Batch<'_>, list_key: &CacheKey, mut members: Vec<CacheKey>, status: Status) {
    if !list_key.is_list() {
        return;
    }
    sort_members(batch, list_key, &mut members);

    let current = batch.read(list_key);
    let current_members = current.as_ref().and_then(|e| e.list().cloned());
    if let Some(entry) = &current {
        if entry.status == status
            && entry.error.is_none()
            && current_members.as_ref().is_some_and(|l| l.members == members)
        {
            return;
        }
    }

    if batch.is_optimistic() {
        let before: HashSet<&CacheKey> = current_members
            .as_ref()
            .map(|l| l.members.iter().collect())
            .unwrap_or_default();
        let added: Vec<CacheKey> = members.iter().filter(|k| !before.contains(k)).cloned().collect();
        for key in &added {
            batch.retain_for_layer(key);
        }
    } else {
        retain_members(batch.state_mut(), list_key, &members);
    }

    batch.write(list_key, Some(CacheValue::List(Arc::new(ListData { members }))), status);
    batch.changes_mut().modified_lists.insert(list_key.clone());
}

/// Update membership of every loaded list after the objects written in
/// this batch, and return the lists that need a server refetch.
///
/// In the truth layer an object that definitely fails a list's filter is
/// removed, a strict match is added, and an object that may or may not
/// match asks for the list to be refetched (unless the batch came from a
/// list fetch). In an optimistic layer only strict matches are added and
/// only definite failures removed; nothing is refetched.
pub(crate) fn reevaluate_lists(batch: &mut Batch<'_>) -> Vec<CacheKey> {
    let mut revalidate = Vec::new();
    if batch.changes().has_object_changes() {
        let list_keys: Vec<CacheKey> = batch
            .state()
            .lists
            .keys()
            .filter(|k| !batch.changes().modified_lists.contains(*k))
            .cloned()
            .collect();
        for list_key in list_keys {
            if reevaluate_list(batch, &list_key) {
                revalidate.push(list_key);
            }
        }
    }
    revalidate.extend(stale_derived_lists(batch));
    revalidate
}

fn reevaluate_list(batch: &mut Batch<'_>, list_key: &CacheKey) -> bool {
    if list_key.as_link().is_some() {
        reevaluate_link(batch, list_key);
        return false;
    }
    let Some(parts) = list_key.as_list() else {
        return false;
    };
    let Some(entry) = batch.read(list_key) else {
        return false;
    };
    let Some(list) = entry.list() else {
        return false;
    };

    let upserts: Vec<(CacheKey, Arc<ObjectData>)> = batch.changes().upserts_of(&parts.object_type).cloned().collect();
    let deleted: Vec<CacheKey> = batch.changes().deleted_of(&parts.object_type).cloned().collect();
    if upserts.is_empty() && deleted.is_empty() {
        return false;
    }

    let optimistic = batch.is_optimistic();
    let from_list_fetch = batch.changes().origin == ChangeOrigin::ListFetch;
    let mut members = list.members.clone();
    let mut changed = false;
    let mut needs_refetch = false;
    let mut guesses = Vec::new();

    for (key, object) in &upserts {
        let object = with_derived(&batch.state().rdp, parts.rdp.as_ref(), key, object);
        let present = members.contains(key);
        let strict = list_matches(parts, &object, true);
        let possible = strict || list_matches(parts, &object, false);

        if !possible {
            if present {
                members.retain(|m| m != key);
                changed = true;
            }
        } else if strict {
            if present {
                // Sort keys may have changed.
                changed |= !parts.order_by.is_empty();
            } else {
                members.push(key.clone());
                guesses.push(key.clone());
                changed = true;
            }
        } else if !optimistic && !from_list_fetch {
            needs_refetch = true;
        }
    }
    for key in &deleted {
        if members.contains(key) {
            members.retain(|m| m != key);
            changed = true;
        }
    }

    if changed {
        write_list(batch, list_key, members, entry.status);
        let layer = batch.layer();
        if let Some(query) = batch.state_mut().lists.get_mut(list_key) {
            for key in guesses {
                query.guessed.insert(key, layer);
            }
        }
    }
    needs_refetch
}

/// A link's membership comes from the server. Locally, deleted members
/// drop out and modified members are re-sorted.
fn reevaluate_link(batch: &mut Batch<'_>, link_key: &CacheKey) {
    let Some(entry) = batch.read(link_key) else {
        return;
    };
    let Some(list) = entry.list() else {
        return;
    };
    let changes = batch.changes();
    let deleted: HashSet<&CacheKey> = changes.deleted.iter().collect();
    let resort = link_key.order_by().is_some_and(|o| !o.is_empty())
        && changes.modified.iter().any(|(key, _)| list.members.contains(key));
    if !resort && !list.members.iter().any(|key| deleted.contains(key)) {
        return;
    }
    let members: Vec<CacheKey> = list
        .members
        .iter()
        .filter(|key| !deleted.contains(key))
        .cloned()
        .collect();
    write_list(batch, link_key, members, entry.status);
}

/// Modified objects lose their cached derived values; lists that showed
/// those values are refetched to recompute them.
fn stale_derived_lists(batch: &mut Batch<'_>) -> Vec<CacheKey> {
    if batch.is_optimistic() || batch.changes().origin == ChangeOrigin::ListFetch {
        return Vec::new();
    }
    let modified: Vec<CacheKey> = batch.changes().modified.iter().map(|(k, _)| k.clone()).collect();
    let state = batch.state_mut();
    let mut lists = Vec::new();
    for key in modified {
        let configs = state.rdp.get_all_rdp_configs(&key);
        if configs.is_empty() {
            continue;
        }
        state.rdp.invalidate(&key, None);
        for (list_key, query) in &state.lists {
            let shows_derived = list_key
                .rdp()
                .is_some_and(|config| configs.contains(config));
            if shows_derived && query.members.contains(&key) && !lists.contains(list_key) {
                lists.push(list_key.clone());
            }
        }
    }
    lists
}

/// Drop guesses made by an optimistic layer that was rolled back.
pub(crate) fn forget_guesses(state: &mut StoreState, layer: OptimisticId) {
    for query in state.lists.values_mut() {
        query.guessed.retain(|_, l| *l != Some(layer));
    }
}

/// Guesses of a committed layer now stand in truth until a refetch
/// confirms them.
pub(crate) fn settle_guesses(state: &mut StoreState, layer: OptimisticId) {
    for query in state.lists.values_mut() {
        for l in query.guessed.values_mut() {
            if *l == Some(layer) {
                *l = None;
            }
        }
    }
}

// ── Fetching ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageMode {
    First,
    Next,
}

enum Plan {
    Join(SharedFetch),
    Start(u64, CancellationToken),
}

/// Refetch a list from its first page, unless a fetch is already running
/// or the list is fresh. `force` always starts over.
pub(crate) fn revalidate(inner: &Arc<ClientInner>, key: &CacheKey, force: bool) -> Option<SharedFetch> {
    let dedupe = inner.config.dedupe_interval;
    let plan = inner.store.batch(None, ChangeOrigin::Other, |batch| {
        let entry = batch.read(key);
        let query = batch.state_mut().lists.get_mut(key)?;
        if !force {
            if let Some(pending) = query.fetch.in_flight() {
                return Some(Plan::Join(pending));
            }
            if entry.as_ref().is_some_and(|e| is_fresh(e, dedupe)) {
                return None;
            }
        }
        let (generation, token) = query.fetch.begin(&inner.cancel);

        let needs_loading = entry
            .as_ref()
            .is_none_or(|e| e.list().is_none() || matches!(e.status, Status::Init | Status::Error));
        if needs_loading {
            batch.write(key, entry.and_then(|e| e.value.clone()), Status::Loading);
        }
        Some(Plan::Start(generation, token))
    })?;

    match plan {
        Plan::Join(pending) => Some(pending),
        Plan::Start(generation, token) => Some(start(inner, key, generation, token, PageMode::First)),
    }
}

/// Load the next page, sharing any fetch already running for this list.
/// Returns `None` when there is nothing more to load.
pub(crate) fn fetch_more(inner: &Arc<ClientInner>, key: &CacheKey) -> Option<SharedFetch> {
    let (generation, token) = {
        let mut state = inner.store.lock();
        let query = state.lists.get_mut(key)?;
        if let Some(pending) = query.fetch.in_flight() {
            return Some(pending);
        }
        if !query.has_more() {
            return None;
        }
        query.fetch.begin(&inner.cancel)
    };
    Some(start(inner, key, generation, token, PageMode::Next))
}

fn start(
    inner: &Arc<ClientInner>,
    key: &CacheKey,
    generation: u64,
    token: CancellationToken,
    mode: PageMode,
) -> SharedFetch {
    let fetch = run(Arc::clone(inner), key.clone(), generation, token, mode)
        .boxed()
        .shared();
    if let Some(query) = inner.store.lock().lists.get_mut(key) {
        query.fetch.attach(generation, fetch.clone());
    }
    tokio::spawn(fetch.clone());
    fetch
}

/// A page request for either kind of member list.
enum PageRequest {
    List(ListPageRequest),
    Link(LinkPageRequest),
}

impl PageRequest {
    fn new(key: &CacheKey, query: &ListQuery, mode: PageMode) -> Option<Self> {
        let page_token = match mode {
            PageMode::First => None,
            PageMode::Next => query.next_page_token.clone(),
        };
        match key.parts() {
            KeyParts::Object(_) => None,
            KeyParts::List(parts) => Some(Self::List(ListPageRequest {
                object_type: parts.object_type.clone(),
                where_clause: parts.where_clause.clone(),
                order_by: parts.order_by.clone(),
                rids: parts.rids.clone(),
                intersect_with: parts.intersect_with.clone(),
                with_properties: parts.rdp.clone(),
                page_size: query.page_size,
                page_token,
            })),
            KeyParts::Link(parts) => Some(Self::Link(LinkPageRequest {
                source_type: parts.source_type.clone(),
                source_primary_key: parts.source_primary_key.clone(),
                link_name: parts.link_name.clone(),
                where_clause: parts.where_clause.clone(),
                order_by: parts.order_by.clone(),
                page_size: query.page_size,
                page_token,
            })),
        }
    }

    fn page_token(&self) -> Option<&str> {
        match self {
            Self::List(r) => r.page_token.as_deref(),
            Self::Link(r) => r.page_token.as_deref(),
        }
    }

    async fn send(&self, wire: &dyn WireClient) -> Result<ListPage, WireError> {
        match self {
            Self::List(r) => wire.fetch_list_page(r).await,
            Self::Link(r) => wire.fetch_link_page(r).await,
        }
    }
}

async fn run(inner: Arc<ClientInner>, key: CacheKey, generation: u64, token: CancellationToken, mut mode: PageMode) {
    loop {
        let request = {
            let state = inner.store.lock();
            state.lists.get(&key).and_then(|query| PageRequest::new(&key, query, mode))
        };
        let Some(request) = request else {
            return;
        };
        debug!(%key, generation, page_token = ?request.page_token(), "fetching list page");

        let result = tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!(%key, generation, "list fetch cancelled");
                return;
            }
            result = request.send(&*inner.wire) => result,
        };

        let (follow_up, again) = inner.store.batch(None, ChangeOrigin::ListFetch, |batch| {
            let current = batch
                .state()
                .lists
                .get(&key)
                .is_some_and(|q| q.fetch.is_current(generation));
            if !current {
                debug!(%key, generation, "discarding stale list page");
                return (Vec::new(), false);
            }
            match result {
                Ok(page) => {
                    let again = apply_page(batch, &key, page, mode);
                    if !again {
                        if let Some(query) = batch.state_mut().lists.get_mut(&key) {
                            query.fetch.finish(generation);
                        }
                    }
                    (reevaluate_lists(batch), again)
                }
                Err(err) => {
                    if let Some(query) = batch.state_mut().lists.get_mut(&key) {
                        query.fetch.finish(generation);
                    }
                    let err = CoreError::fetch(key.object_type(), err);
                    warn!(%key, error = %err, "list fetch failed");
                    batch.write_error(&key, Arc::new(err));
                    (Vec::new(), false)
                }
            }
        });

        inner.revalidate_all(&follow_up);
        if !again {
            return;
        }
        mode = PageMode::Next;
    }
}

/// Fold one page into the store. Returns whether another page should be
/// loaded right away.
fn apply_page(batch: &mut Batch<'_>, list_key: &CacheKey, page: ListPage, mode: PageMode) -> bool {
    let previous = batch.read(list_key);
    let mut members = match mode {
        PageMode::First => Vec::new(),
        PageMode::Next => previous
            .as_ref()
            .and_then(|e| e.list().map(|l| l.members.clone()))
            .unwrap_or_default(),
    };

    for object in page.data {
        let key = batch.state_mut().object_key(&object.object_type, &object.primary_key);
        let object = match list_key.rdp() {
            Some(config) => {
                let (base, derived) = object.split_derived(config.property_names());
                batch.state_mut().rdp.set(key.clone(), config.clone(), Arc::new(derived));
                base
            }
            None => object,
        };
        batch.write_object(&key, Arc::new(object), Status::Loaded);
        members.push(key);
    }

    let Some(query) = batch.state_mut().lists.get_mut(list_key) else {
        return false;
    };
    query.next_page_token = page.next_page_token;
    let has_more = query.has_more();
    let again = has_more
        && match query.auto_fetch_more {
            AutoFetchMore::Off => false,
            AutoFetchMore::All => true,
            AutoFetchMore::AtLeast(n) => members.len() < n,
        };

    if mode == PageMode::First {
        let complete = !has_more;
        let fetched: HashSet<&CacheKey> = members.iter().collect();
        query.guessed.retain(|key, layer| {
            // Guesses from pending layers are not on the server yet.
            if layer.is_some() {
                return true;
            }
            if complete && !fetched.contains(key) {
                warn!(list = %list_key, object = %key, "list consistency warning: locally added object is not in the server result");
            }
            false
        });
    }

    let was_loaded = previous.as_ref().is_some_and(|e| e.status == Status::Loaded);
    let status = if again && !was_loaded {
        Status::Loading
    } else {
        Status::Loaded
    };
    write_list(batch, list_key, members, status);
    again
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::{ObserveLinksOptions, ObserveListOptions};
    use crate::model::{OrderBy, PrimaryKey, RdpConfig, WhereClause};
    use crate::store::{KeyParts, Store};
    use serde_json::json;

    fn todo(pk: i64, done: bool, priority: i64) -> ObjectData {
        ObjectData::new("Todo", pk)
            .with_property("done", done)
            .with_property("priority", priority)
    }

    fn open_list(store: &Store, order_by: &OrderBy) -> CacheKey {
        let parts = store.list_parts(
            &ObserveListOptions::new("Todo")
                .where_clause(WhereClause::eq("done", false))
                .order_by(order_by.clone()),
        );
        let mut state = store.lock();
        let key = state.key(KeyParts::List(parts));
        state.lists.insert(key.clone(), ListQuery::new(10, AutoFetchMore::Off));
        key
    }

    fn load(store: &Store, list_key: &CacheKey, objects: Vec<ObjectData>) {
        store.batch(None, ChangeOrigin::ListFetch, |batch| {
            let mut members = Vec::new();
            for object in objects {
                let key = batch.state_mut().object_key(&object.object_type, &object.primary_key);
                batch.write_object(&key, Arc::new(object), Status::Loaded);
                members.push(key);
            }
            write_list(batch, list_key, members, Status::Loaded);
        });
    }

    fn members(store: &Store, list_key: &CacheKey) -> Vec<PrimaryKey> {
        let state = store.lock();
        let entry = state.layers.top(list_key).unwrap();
        entry
            .list()
            .unwrap()
            .members
            .iter()
            .map(|k| k.as_object().unwrap().primary_key.clone())
            .collect()
    }

    #[test]
    fn rid_restricted_list_needs_known_rid() {
        let store = Store::new(4);
        let parts = store.list_parts(&ObserveListOptions::new("Todo").rids(vec!["ri.1".into()]));
        let with_rid = ObjectData::new("Todo", 1).with_rid("ri.1");
        let other_rid = ObjectData::new("Todo", 2).with_rid("ri.2");
        let no_rid = ObjectData::new("Todo", 3);

        assert!(list_matches(&parts, &with_rid, true));
        assert!(!list_matches(&parts, &other_rid, false));
        assert!(!list_matches(&parts, &no_rid, true));
        assert!(list_matches(&parts, &no_rid, false));
    }

    #[test]
    fn intersect_clauses_all_apply() {
        let store = Store::new(4);
        let parts = store.list_parts(&ObserveListOptions::new("Todo").intersect_with(vec![
            WhereClause::eq("done", false),
            WhereClause::from_json(&json!({ "priority": { "$gt": 1 } })).unwrap(),
        ]));
        assert!(list_matches(&parts, &todo(1, false, 2), true));
        assert!(!list_matches(&parts, &todo(1, false, 1), true));
        assert!(!list_matches(&parts, &todo(1, true, 2), true));
    }

    #[test]
    fn ordering_puts_nulls_last() {
        let store = Store::new(4);
        let list = open_list(&store, &OrderBy::new().desc("priority"));
        load(
            &store,
            &list,
            vec![
                todo(1, false, 1),
                ObjectData::new("Todo", 2).with_property("done", false),
                todo(3, false, 5),
            ],
        );
        assert_eq!(members(&store, &list), [3, 1, 2].map(PrimaryKey::from).to_vec());
    }

    #[test]
    fn truth_writes_add_and_remove_members() {
        let store = Store::new(4);
        let list = open_list(&store, &OrderBy::new().asc("priority"));
        load(&store, &list, vec![todo(1, false, 1)]);

        let refetch = store.batch(None, ChangeOrigin::Other, |batch| {
            let added = batch.state_mut().object_key("Todo", &PrimaryKey::from(2));
            batch.write_object(&added, Arc::new(todo(2, false, 0)), Status::Loaded);
            let finished = batch.state_mut().object_key("Todo", &PrimaryKey::from(1));
            batch.write_object(&finished, Arc::new(todo(1, true, 1)), Status::Loaded);
            reevaluate_lists(batch)
        });

        assert!(refetch.is_empty());
        assert_eq!(members(&store, &list), vec![PrimaryKey::from(2)]);
        let state = store.lock();
        assert_eq!(state.lists[&list].guessed.len(), 1);
        assert_eq!(state.lists[&list].members.len(), 1);
    }

    #[test]
    fn undecidable_change_requests_refetch() {
        let store = Store::new(4);
        let parts = store.list_parts(&ObserveListOptions::new("Todo").where_clause(
            WhereClause::from_json(&json!({ "title": { "$containsAnyTerm": "ship" } })).unwrap(),
        ));
        let list = {
            let mut state = store.lock();
            let key = state.key(KeyParts::List(parts));
            state.lists.insert(key.clone(), ListQuery::new(10, AutoFetchMore::Off));
            key
        };
        load(&store, &list, Vec::new());

        let write = |origin| {
            store.batch(None, origin, |batch| {
                let key = batch.state_mut().object_key("Todo", &PrimaryKey::from(1));
                let object = ObjectData::new("Todo", 1).with_property("title", format!("{origin:?}"));
                batch.write_object(&key, Arc::new(object), Status::Loaded);
                reevaluate_lists(batch)
            })
        };
        assert_eq!(write(ChangeOrigin::Other), vec![list.clone()]);
        assert!(write(ChangeOrigin::ListFetch).is_empty());
        assert!(members(&store, &list).is_empty());
    }

    #[test]
    fn optimistic_membership_reverts_on_rollback() {
        let store = Store::new(4);
        let list = open_list(&store, &OrderBy::new());
        load(&store, &list, vec![todo(1, false, 1)]);

        let handle = store.lock().layers.push_optimistic().unwrap();
        let layer = handle.id();
        store.batch(Some(layer), ChangeOrigin::Other, |batch| {
            let key = batch.state_mut().object_key("Todo", &PrimaryKey::from(2));
            batch.retain_for_layer(&key);
            batch.write_object(&key, Arc::new(todo(2, false, 1)), Status::Loading);
            reevaluate_lists(batch)
        });
        assert_eq!(members(&store, &list), vec![PrimaryKey::from(1), PrimaryKey::from(2)]);

        store.batch(None, ChangeOrigin::Other, |batch| {
            batch.rollback_layer(handle);
            forget_guesses(batch.state_mut(), layer);
        });
        assert_eq!(members(&store, &list), vec![PrimaryKey::from(1)]);
        assert!(store.lock().lists[&list].guessed.is_empty());
    }

    #[test]
    fn modified_objects_invalidate_derived_values() {
        let store = Store::new(4);
        let config = RdpConfig::new().with("score", json!({ "aggregate": "count" }));
        let parts = store.list_parts(&ObserveListOptions::new("Todo").with_properties(config));
        let canonical = parts.rdp.clone().unwrap();
        let (list, object) = {
            let mut state = store.lock();
            let list = state.key(KeyParts::List(parts));
            state.lists.insert(list.clone(), ListQuery::new(10, AutoFetchMore::Off));
            let object = state.object_key("Todo", &PrimaryKey::from(1));
            let mut derived = serde_json::Map::new();
            derived.insert("score".into(), json!(4));
            state.rdp.set(object.clone(), canonical.clone(), Arc::new(derived));
            (list, object)
        };
        load(&store, &list, vec![todo(1, false, 1)]);

        let refetch = store.batch(None, ChangeOrigin::Other, |batch| {
            batch.write_object(&object, Arc::new(todo(1, false, 9)), Status::Loaded);
            reevaluate_lists(batch)
        });
        assert_eq!(refetch, vec![list]);
        assert!(!store.lock().rdp.has(&object, &canonical));
    }

    #[test]
    fn link_members_follow_local_edits_without_guessing() {
        let store = Store::new(4);
        let parts = store.link_parts(
            &ObserveLinksOptions::new("Project", 1, "todos").order_by(OrderBy::new().desc("priority")),
        );
        let link = {
            let mut state = store.lock();
            let key = state.key(KeyParts::Link(parts));
            state.lists.insert(key.clone(), ListQuery::new(10, AutoFetchMore::Off));
            key
        };
        load(&store, &link, vec![todo(1, false, 1), todo(2, false, 3), todo(3, false, 2)]);
        assert_eq!(members(&store, &link), [2, 3, 1].map(PrimaryKey::from).to_vec());

        let refetch = store.batch(None, ChangeOrigin::Other, |batch| {
            let unlinked = batch.state_mut().object_key("Todo", &PrimaryKey::from(4));
            batch.write_object(&unlinked, Arc::new(todo(4, false, 9)), Status::Loaded);
            let bumped = batch.state_mut().object_key("Todo", &PrimaryKey::from(1));
            batch.write_object(&bumped, Arc::new(todo(1, false, 5)), Status::Loaded);
            let removed = batch.state_mut().object_key("Todo", &PrimaryKey::from(3));
            batch.write_tombstone(&removed, Status::Loaded);
            reevaluate_lists(batch)
        });

        assert!(refetch.is_empty());
        assert_eq!(members(&store, &link), [1, 2].map(PrimaryKey::from).to_vec());
        assert!(store.lock().lists[&link].guessed.is_empty());
    }

    #[test]
    fn resolve_merges_derived_values() {
        let store = Store::new(4);
        let config = RdpConfig::new().with("score", json!({ "aggregate": "count" }));
        let parts = store.list_parts(&ObserveListOptions::new("Todo").with_properties(config));
        let canonical = parts.rdp.clone().unwrap();
        let list = {
            let mut state = store.lock();
            let list = state.key(KeyParts::List(parts));
            state.lists.insert(list.clone(), ListQuery::new(10, AutoFetchMore::Off));
            let object = state.object_key("Todo", &PrimaryKey::from(1));
            let mut derived = serde_json::Map::new();
            derived.insert("score".into(), json!(4));
            state.rdp.set(object, canonical, Arc::new(derived));
            list
        };
        load(&store, &list, vec![todo(1, false, 1)]);

        let state = store.lock();
        let entry = state.layers.top(&list).unwrap();
        let objects = resolve_members(&state, &list, entry.list().unwrap());
        assert_eq!(objects[0].get("score"), Some(json!(4)));
    }
}
