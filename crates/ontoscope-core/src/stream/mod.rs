// ── Reactive observations ──
//
// Handles returned by `ObservableClient::observe_*`. Each one holds a
// reference on its cache key for as long as it lives, so the key is not
// garbage collected while someone is watching it.

mod observer;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures_core::Stream;
use futures_util::{stream, StreamExt};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::client::ClientInner;
use crate::error::CoreError;
use crate::model::ObjectData;
use crate::query::{list, object};
use crate::store::{CacheKey, Status, StoreState, SubjectPayload, SubjectReceiver};

pub use observer::{Observer, Subscription, Unsubscribable};

// ── Payloads ─────────────────────────────────────────────────────

/// What observers of a single object see.
#[derive(Debug, Clone)]
pub struct ObjectPayload {
    /// `None` before the first load and after the object was deleted.
    pub object: Option<Arc<ObjectData>>,
    pub status: Status,
    pub is_optimistic: bool,
    pub last_updated: DateTime<Utc>,
    pub error: Option<Arc<CoreError>>,
    deleted: bool,
}

impl ObjectPayload {
    pub(crate) fn from_subject(payload: &SubjectPayload) -> Self {
        let entry = &payload.entry;
        Self {
            object: entry.object().cloned(),
            status: entry.status,
            is_optimistic: payload.is_optimistic,
            last_updated: entry.last_updated,
            error: entry.error.clone(),
            deleted: entry.is_tombstone(),
        }
    }

    /// The object was deleted, by the server or by a pending optimistic
    /// update.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// What observers of a list see: member objects resolved from the cache,
/// in list order, with derived properties merged in.
#[derive(Debug, Clone)]
pub struct ListPayload {
    pub objects: Vec<Arc<ObjectData>>,
    pub status: Status,
    pub is_optimistic: bool,
    /// Whether the server has more pages.
    pub has_more: bool,
    pub last_updated: DateTime<Utc>,
    pub error: Option<Arc<CoreError>>,
}

impl ListPayload {
    pub(crate) fn resolve(state: &StoreState, key: &CacheKey, payload: &SubjectPayload) -> Self {
        let entry = &payload.entry;
        let objects = match (&payload.members, entry.list()) {
            (Some(members), _) => members.to_vec(),
            (None, Some(l)) => list::resolve_members(state, key, l),
            (None, None) => Vec::new(),
        };
        Self {
            objects,
            status: entry.status,
            is_optimistic: payload.is_optimistic,
            has_more: state.lists.get(key).is_some_and(list::ListQuery::has_more),
            last_updated: entry.last_updated,
            error: entry.error.clone(),
        }
    }
}

// ── Key references ───────────────────────────────────────────────

/// One reference on a cache key, dropped on unsubscribe.
pub(crate) struct KeyRef {
    inner: Arc<ClientInner>,
    key: CacheKey,
    released: bool,
}

impl KeyRef {
    pub(crate) fn new(inner: Arc<ClientInner>, key: CacheKey) -> Self {
        Self {
            inner,
            key,
            released: false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.release(&self.key);
        }
    }
}

impl Drop for KeyRef {
    fn drop(&mut self) {
        self.release();
    }
}

// ── ObjectObservation ────────────────────────────────────────────

/// A live view of one object.
///
/// Offers a snapshot via [`current`](Self::current), change notification
/// via [`changed`](Self::changed), or a `Stream` via
/// [`into_stream`](Self::into_stream). Every change published after the
/// observation was created is delivered, in order.
pub struct ObjectObservation {
    current: ObjectPayload,
    receiver: SubjectReceiver,
    key_ref: KeyRef,
}

impl ObjectObservation {
    pub(crate) fn new(inner: Arc<ClientInner>, key: CacheKey, mut receiver: SubjectReceiver) -> Self {
        let current = ObjectPayload::from_subject(&receiver.skip_pending());
        Self {
            current,
            receiver,
            key_ref: KeyRef::new(inner, key),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key_ref.key
    }

    /// Payload as of the last `changed()` (or creation).
    pub fn current(&self) -> &ObjectPayload {
        &self.current
    }

    /// Latest payload, which may be newer than `current()`.
    pub fn latest(&self) -> ObjectPayload {
        ObjectPayload::from_subject(&self.receiver.latest())
    }

    /// Wait for the next change. Returns `None` once the key is gone.
    pub async fn changed(&mut self) -> Option<ObjectPayload> {
        let payload = self.receiver.recv().await?;
        self.current = ObjectPayload::from_subject(&payload);
        Some(self.current.clone())
    }

    /// Refetch from the server, resolving once the fetch completes.
    pub async fn refresh(&self) {
        if let Some(fetch) = object::revalidate(&self.key_ref.inner, &self.key_ref.key, true) {
            fetch.await;
        }
    }

    /// Convert into a `Stream` that first yields [`current`](Self::current),
    /// then every change not yet taken with `changed()`.
    pub fn into_stream(self) -> ObservationStream<ObjectPayload> {
        let queued = UnboundedReceiverStream::new(self.receiver.into_queue())
            .map(|payload| ObjectPayload::from_subject(&payload));
        let inner = stream::iter([self.current]).chain(queued);
        ObservationStream {
            inner: Box::pin(inner),
            key_ref: Some(self.key_ref),
        }
    }

    /// Deliver every payload to `observer` until unsubscribed.
    pub fn subscribe(self, observer: impl Observer<ObjectPayload>) -> Subscription {
        Subscription::spawn(self.into_stream(), observer)
    }
}

impl Unsubscribable for ObjectObservation {
    fn unsubscribe(&mut self) {
        self.key_ref.release();
    }
}

// ── ListObservation ──────────────────────────────────────────────

/// A live view of one list query.
pub struct ListObservation {
    current: ListPayload,
    receiver: SubjectReceiver,
    key_ref: KeyRef,
}

impl ListObservation {
    pub(crate) fn new(inner: Arc<ClientInner>, key: CacheKey, mut receiver: SubjectReceiver) -> Self {
        let payload = receiver.skip_pending();
        let current = ListPayload::resolve(&inner.store.lock(), &key, &payload);
        Self {
            current,
            receiver,
            key_ref: KeyRef::new(inner, key),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key_ref.key
    }

    fn resolve(&self, payload: &SubjectPayload) -> ListPayload {
        ListPayload::resolve(&self.key_ref.inner.store.lock(), &self.key_ref.key, payload)
    }

    pub fn current(&self) -> &ListPayload {
        &self.current
    }

    pub fn latest(&self) -> ListPayload {
        // Never hold the channel borrow while taking the store lock.
        let payload = self.receiver.latest();
        self.resolve(&payload)
    }

    /// Wait for the next change. Returns `None` once the key is gone.
    pub async fn changed(&mut self) -> Option<ListPayload> {
        let payload = self.receiver.recv().await?;
        self.current = self.resolve(&payload);
        Some(self.current.clone())
    }

    pub fn has_more(&self) -> bool {
        self.key_ref
            .inner
            .store
            .lock()
            .lists
            .get(&self.key_ref.key)
            .is_some_and(list::ListQuery::has_more)
    }

    /// Refetch from the first page, resolving once the fetch completes.
    pub async fn refresh(&self) {
        if let Some(fetch) = list::revalidate(&self.key_ref.inner, &self.key_ref.key, true) {
            fetch.await;
        }
    }

    /// Load the next page. Concurrent calls share one request; a call
    /// while the first page is loading waits for that instead.
    pub async fn fetch_more(&self) {
        if let Some(fetch) = list::fetch_more(&self.key_ref.inner, &self.key_ref.key) {
            fetch.await;
        }
    }

    pub fn into_stream(self) -> ObservationStream<ListPayload> {
        let inner = Arc::clone(&self.key_ref.inner);
        let key = self.key_ref.key.clone();
        let queued = UnboundedReceiverStream::new(self.receiver.into_queue())
            .map(move |payload| ListPayload::resolve(&inner.store.lock(), &key, &payload));
        let stream = stream::iter([self.current]).chain(queued);
        ObservationStream {
            inner: Box::pin(stream),
            key_ref: Some(self.key_ref),
        }
    }

    pub fn subscribe(self, observer: impl Observer<ListPayload>) -> Subscription {
        Subscription::spawn(self.into_stream(), observer)
    }
}

impl Unsubscribable for ListObservation {
    fn unsubscribe(&mut self) {
        self.key_ref.release();
    }
}

// ── ObservationStream ────────────────────────────────────────────

/// `Stream` adapter over an observation. Ends after `unsubscribe()` or
/// when the key is cleaned up.
pub struct ObservationStream<T> {
    inner: Pin<Box<dyn Stream<Item = T> + Send>>,
    key_ref: Option<KeyRef>,
}

impl<T> Stream for ObservationStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.key_ref.is_none() {
            return Poll::Ready(None);
        }
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> Unsubscribable for ObservationStream<T> {
    fn unsubscribe(&mut self) {
        // Dropping the reference releases the key.
        self.key_ref = None;
    }
}
