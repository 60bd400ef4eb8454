#![allow(dead_code, clippy::unwrap_used)]
// Shared helpers for integration tests: an in-memory wire client.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use ontoscope_core::filter::object_matches_where_clause;
use ontoscope_core::{
    ActionDefinition, ActionResult, LinkPageRequest, ListObservation, ListPage, ListPageRequest, ListPayload,
    ObjectData, ObjectObservation, ObjectPayload, ObservableClient, PrimaryKey, StoreConfig,
    WireClient, WireError,
};

type LinkEdge = ((String, PrimaryKey, String), (String, PrimaryKey));

type ActionHandler = Box<dyn Fn(&ActionDefinition, &Value) -> Result<ActionResult, WireError> + Send + Sync>;

/// Server stand-in holding objects and links in insertion order.
///
/// List and link pages use the decimal offset as page token. Derived properties
/// are computed as `"<name>:<primary key>"`.
#[derive(Default)]
pub struct MockWire {
    objects: Mutex<Vec<ObjectData>>,
    links: Mutex<Vec<LinkEdge>>,
    object_error: Mutex<Option<WireError>>,
    list_error: Mutex<Option<WireError>>,
    action: Mutex<Option<ActionHandler>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub object_fetches: AtomicUsize,
    pub list_fetches: AtomicUsize,
    pub link_fetches: AtomicUsize,
    pub action_calls: AtomicUsize,
    pub page_tokens: Mutex<Vec<Option<String>>>,
}

impl MockWire {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, object: ObjectData) {
        let mut objects = self.objects.lock();
        match objects
            .iter_mut()
            .find(|o| o.object_type == object.object_type && o.primary_key == object.primary_key)
        {
            Some(existing) => *existing = object,
            None => objects.push(object),
        }
    }

    pub fn remove(&self, object_type: &str, primary_key: impl Into<PrimaryKey>) {
        let primary_key = primary_key.into();
        self.objects
            .lock()
            .retain(|o| !(o.object_type == object_type && o.primary_key == primary_key));
    }

    /// Link `source` to `target` under `link_name`.
    pub fn link(&self, source: (&str, i64), link_name: &str, target: (&str, i64)) {
        let from = (source.0.to_owned(), PrimaryKey::from(source.1), link_name.to_owned());
        self.links
            .lock()
            .push((from, (target.0.to_owned(), PrimaryKey::from(target.1))));
    }

    pub fn unlink(&self, source: (&str, i64), link_name: &str, target: (&str, i64)) {
        let from = (source.0.to_owned(), PrimaryKey::from(source.1), link_name.to_owned());
        let to = (target.0.to_owned(), PrimaryKey::from(target.1));
        self.links.lock().retain(|edge| *edge != (from.clone(), to.clone()));
    }

    pub fn fail_objects(&self, error: Option<WireError>) {
        *self.object_error.lock() = error;
    }

    pub fn fail_lists(&self, error: Option<WireError>) {
        *self.list_error.lock() = error;
    }

    pub fn on_action(
        &self,
        handler: impl Fn(&ActionDefinition, &Value) -> Result<ActionResult, WireError> + Send + Sync + 'static,
    ) {
        *self.action.lock() = Some(Box::new(handler));
    }

    /// Make every request wait for [`release`](Self::release).
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held requests through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = self.gate.lock().as_ref() {
            gate.add_permits(n);
        }
    }

    /// Stop holding requests, letting waiting ones through.
    pub fn open(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
    }

    pub fn object_fetches(&self) -> usize {
        self.object_fetches.load(Ordering::SeqCst)
    }

    pub fn list_fetches(&self) -> usize {
        self.list_fetches.load(Ordering::SeqCst)
    }

    pub fn link_fetches(&self) -> usize {
        self.link_fetches.load(Ordering::SeqCst)
    }
}

fn page_of(matching: &[ObjectData], page_token: Option<&str>, page_size: usize) -> (Vec<ObjectData>, Option<String>) {
    let offset: usize = page_token.map_or(0, |token| token.parse().unwrap());
    let end = (offset + page_size).min(matching.len());
    let next_page_token = (end < matching.len()).then(|| end.to_string());
    (matching[offset.min(end)..end].to_vec(), next_page_token)
}

#[async_trait]
impl WireClient for MockWire {
    async fn fetch_object(
        &self,
        object_type: &str,
        primary_key: &PrimaryKey,
        _select: Option<&[String]>,
    ) -> Result<ObjectData, WireError> {
        self.object_fetches.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        if let Some(error) = self.object_error.lock().clone() {
            return Err(error);
        }
        self.objects
            .lock()
            .iter()
            .find(|o| o.object_type == object_type && &o.primary_key == primary_key)
            .cloned()
            .ok_or_else(|| WireError::NotFound {
                object_type: object_type.to_owned(),
                primary_key: primary_key.to_string(),
            })
    }

    async fn fetch_list_page(&self, request: &ListPageRequest) -> Result<ListPage, WireError> {
        self.list_fetches.fetch_add(1, Ordering::SeqCst);
        self.page_tokens.lock().push(request.page_token.clone());
        self.pass_gate().await;
        if let Some(error) = self.list_error.lock().clone() {
            return Err(error);
        }

        let matching: Vec<ObjectData> = self
            .objects
            .lock()
            .iter()
            .filter(|o| o.object_type == request.object_type)
            .filter(|o| object_matches_where_clause(o, &request.where_clause, true))
            .filter(|o| {
                request.rids.as_ref().is_none_or(|rids| {
                    o.rid.as_ref().is_some_and(|rid| rids.contains(rid))
                })
            })
            .filter(|o| {
                request.intersect_with.as_ref().is_none_or(|clauses| {
                    clauses
                        .iter()
                        .all(|clause| object_matches_where_clause(o, clause, true))
                })
            })
            .cloned()
            .collect();

        let (page, next_page_token) = page_of(&matching, request.page_token.as_deref(), request.page_size);
        let data = page
            .into_iter()
            .map(|o| match &request.with_properties {
                Some(config) => config.property_names().fold(o, |o, name| {
                    let value = json!(format!("{name}:{}", o.primary_key));
                    o.with_property(name.clone(), value)
                }),
                None => o,
            })
            .collect();
        Ok(ListPage { data, next_page_token })
    }

    async fn fetch_link_page(&self, request: &LinkPageRequest) -> Result<ListPage, WireError> {
        self.link_fetches.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        if let Some(error) = self.list_error.lock().clone() {
            return Err(error);
        }

        let from = (
            request.source_type.clone(),
            request.source_primary_key.clone(),
            request.link_name.clone(),
        );
        let targets: Vec<(String, PrimaryKey)> = self
            .links
            .lock()
            .iter()
            .filter(|(source, _)| *source == from)
            .map(|(_, target)| target.clone())
            .collect();
        let objects = self.objects.lock();
        let matching: Vec<ObjectData> = targets
            .iter()
            .filter_map(|(object_type, primary_key)| {
                objects
                    .iter()
                    .find(|o| &o.object_type == object_type && &o.primary_key == primary_key)
            })
            .filter(|o| object_matches_where_clause(o, &request.where_clause, true))
            .cloned()
            .collect();
        drop(objects);

        let (data, next_page_token) = page_of(&matching, request.page_token.as_deref(), request.page_size);
        Ok(ListPage { data, next_page_token })
    }

    async fn apply_action(&self, action: &ActionDefinition, args: &Value) -> Result<ActionResult, WireError> {
        self.action_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        let handler = self.action.lock();
        match handler.as_ref() {
            Some(handler) => handler(action, args),
            None => Ok(ActionResult::default()),
        }
    }
}

// ── Client helpers ──────────────────────────────────────────────────

/// Config with immediate cleanup and no refetch of fresh entries.
pub fn test_config() -> StoreConfig {
    StoreConfig {
        gc_delay: Duration::ZERO,
        dedupe_interval: Duration::from_secs(60),
        ..StoreConfig::default()
    }
}

pub fn client(wire: &Arc<MockWire>) -> ObservableClient {
    ObservableClient::new(wire.clone(), test_config())
}

pub fn todo(pk: i64, title: &str, done: bool) -> ObjectData {
    ObjectData::new("Todo", pk)
        .with_rid(format!("ri.todo.{pk}"))
        .with_property("title", title)
        .with_property("done", done)
}

const WAIT: Duration = Duration::from_secs(5);

/// Wait for the first object payload (including the current one)
/// satisfying `pred`.
pub async fn object_until(obs: &mut ObjectObservation, pred: impl Fn(&ObjectPayload) -> bool) -> ObjectPayload {
    if pred(obs.current()) {
        return obs.current().clone();
    }
    tokio::time::timeout(WAIT, async {
        loop {
            let payload = obs.changed().await.expect("observation ended");
            if pred(&payload) {
                return payload;
            }
        }
    })
    .await
    .expect("timed out waiting for object payload")
}

pub async fn list_until(obs: &mut ListObservation, pred: impl Fn(&ListPayload) -> bool) -> ListPayload {
    if pred(obs.current()) {
        return obs.current().clone();
    }
    tokio::time::timeout(WAIT, async {
        loop {
            let payload = obs.changed().await.expect("observation ended");
            if pred(&payload) {
                return payload;
            }
        }
    })
    .await
    .expect("timed out waiting for list payload")
}

pub fn titles(payload: &ListPayload) -> Vec<String> {
    payload
        .objects
        .iter()
        .map(|o| o.get("title").and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_default())
        .collect()
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub fn title(payload: &ObjectPayload) -> Option<String> {
    payload
        .object
        .as_ref()
        .and_then(|o| o.get("title"))
        .and_then(|v| v.as_str().map(str::to_owned))
}
