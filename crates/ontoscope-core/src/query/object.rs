use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{list, FetchSlot, SharedFetch};
use crate::client::ClientInner;
use crate::error::CoreError;
use crate::model::PrimaryKey;
use crate::store::{CacheKey, ChangeOrigin, Entry, Status};

/// Fetch state of one observed object.
pub(crate) struct ObjectQuery {
    pub select: Option<Vec<String>>,
    pub fetch: FetchSlot,
}

impl ObjectQuery {
    pub fn new(select: Option<Vec<String>>) -> Self {
        Self {
            select,
            fetch: FetchSlot::default(),
        }
    }
}

enum Plan {
    Join(SharedFetch),
    Start {
        generation: u64,
        token: CancellationToken,
        select: Option<Vec<String>>,
    },
}

/// Whether a loaded entry is recent enough to skip a refetch.
pub(crate) fn is_fresh(entry: &Entry, dedupe: std::time::Duration) -> bool {
    entry.status == Status::Loaded
        && (Utc::now() - entry.last_updated)
            .to_std()
            .is_ok_and(|age| age < dedupe)
}

/// Fetch `key` unless a fetch is already running or the cached value is
/// fresh. `force` always starts a new fetch, superseding any running one.
///
/// A key with no usable value is marked `loading`; a loaded key keeps its
/// value visible while it refreshes.
pub(crate) fn revalidate(inner: &Arc<ClientInner>, key: &CacheKey, force: bool) -> Option<SharedFetch> {
    let dedupe = inner.config.dedupe_interval;
    let plan = inner.store.batch(None, ChangeOrigin::Other, |batch| {
        let entry = batch.read(key);
        let query = batch.state_mut().objects.get_mut(key)?;
        if !force {
            if let Some(pending) = query.fetch.in_flight() {
                return Some(Plan::Join(pending));
            }
            if entry.as_ref().is_some_and(|e| is_fresh(e, dedupe)) {
                return None;
            }
        }
        let (generation, token) = query.fetch.begin(&inner.cancel);
        let select = query.select.clone();

        let needs_loading = entry
            .as_ref()
            .is_none_or(|e| e.object().is_none() || matches!(e.status, Status::Init | Status::Error));
        if needs_loading {
            batch.write(key, entry.and_then(|e| e.value.clone()), Status::Loading);
        }
        Some(Plan::Start {
            generation,
            token,
            select,
        })
    })?;

    let (generation, token, select) = match plan {
        Plan::Join(pending) => return Some(pending),
        Plan::Start {
            generation,
            token,
            select,
        } => (generation, token, select),
    };

    let fetch = run(Arc::clone(inner), key.clone(), generation, token, select)
        .boxed()
        .shared();
    if let Some(query) = inner.store.lock().objects.get_mut(key) {
        query.fetch.attach(generation, fetch.clone());
    }
    tokio::spawn(fetch.clone());
    Some(fetch)
}

async fn run(
    inner: Arc<ClientInner>,
    key: CacheKey,
    generation: u64,
    token: CancellationToken,
    select: Option<Vec<String>>,
) {
    let Some(parts) = key.as_object() else {
        return;
    };
    let (object_type, primary_key): (&str, &PrimaryKey) = (&parts.object_type, &parts.primary_key);
    debug!(%key, generation, "fetching object");

    let result = tokio::select! {
        biased;
        () = token.cancelled() => {
            debug!(%key, generation, "object fetch cancelled");
            return;
        }
        result = inner.wire.fetch_object(object_type, primary_key, select.as_deref()) => result,
    };

    let follow_up = inner.store.batch(None, ChangeOrigin::Other, |batch| {
        let current = batch
            .state_mut()
            .objects
            .get_mut(&key)
            .is_some_and(|q| q.fetch.finish(generation));
        if !current {
            debug!(%key, generation, "discarding stale object fetch");
            return Vec::new();
        }
        match result {
            Ok(object) => {
                batch.write_object(&key, Arc::new(object), Status::Loaded);
                list::reevaluate_lists(batch)
            }
            Err(err) => {
                let err = CoreError::fetch(object_type, err);
                warn!(%key, error = %err, "object fetch failed");
                batch.write_error(&key, Arc::new(err));
                Vec::new()
            }
        }
    });

    inner.revalidate_all(&follow_up);
}
