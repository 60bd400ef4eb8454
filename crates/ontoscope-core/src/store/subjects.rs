// ── Subject broker ──
//
// One hot replay-1 channel per cache key. The latest payload lives in a
// `tokio::sync::watch`; every subscriber also gets its own unbounded
// queue so no emission is lost when several land before it is polled.
// Subjects are created lazily and completed by dropping them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::cache_key::CacheKey;
use super::entry::{same_value, Entry};
use super::layers::Layers;
use crate::model::ObjectData;

/// What subscribers of a key receive.
#[derive(Debug, Clone)]
pub struct SubjectPayload {
    pub entry: Arc<Entry>,
    /// The visible value differs (by reference) from the truth value.
    pub is_optimistic: bool,
    /// Members of a list as they were resolved when this payload was
    /// published. `None` for objects and for the seed of a new subject.
    pub members: Option<Arc<Vec<Arc<ObjectData>>>>,
}

impl SubjectPayload {
    /// Payload for `key` as currently visible through `layers`.
    pub(crate) fn current(key: &CacheKey, layers: &Layers) -> Self {
        let top = layers.top(key);
        let truth = layers.truth(key);
        let is_optimistic = !same_value(
            top.and_then(|e| e.value.as_ref()),
            truth.and_then(|e| e.value.as_ref()),
        );
        let entry = top.map_or_else(|| Arc::new(Entry::init(key.clone())), Arc::clone);
        Self {
            entry,
            is_optimistic,
            members: None,
        }
    }

    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry) && self.is_optimistic == other.is_optimistic
    }
}

/// One subscriber's end of a subject.
pub struct SubjectReceiver {
    latest: watch::Receiver<SubjectPayload>,
    queue: mpsc::UnboundedReceiver<SubjectPayload>,
}

impl SubjectReceiver {
    /// Latest published payload, without consuming anything.
    pub fn latest(&self) -> SubjectPayload {
        self.latest.borrow().clone()
    }

    /// Next payload in publish order. `None` once the subject is gone and
    /// every queued payload was taken.
    pub async fn recv(&mut self) -> Option<SubjectPayload> {
        self.queue.recv().await
    }

    /// Drop everything queued so far and return the latest payload.
    pub fn skip_pending(&mut self) -> SubjectPayload {
        while self.queue.try_recv().is_ok() {}
        self.latest()
    }

    pub fn into_queue(self) -> mpsc::UnboundedReceiver<SubjectPayload> {
        self.queue
    }
}

/// A hot replay-1 channel for one key.
pub struct Subject {
    latest: watch::Sender<SubjectPayload>,
    queues: Mutex<Vec<mpsc::UnboundedSender<SubjectPayload>>>,
}

impl Subject {
    fn new(seed: SubjectPayload) -> Self {
        let (latest, _) = watch::channel(seed);
        Self {
            latest,
            queues: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> SubjectReceiver {
        let (tx, queue) = mpsc::unbounded_channel();
        // Registered under the queue lock so no publish slips between
        // reading the latest value and joining the fan-out.
        let mut queues = self.queues.lock();
        queues.push(tx);
        SubjectReceiver {
            latest: self.latest.subscribe(),
            queue,
        }
    }

    /// Latest payload.
    pub fn value(&self) -> SubjectPayload {
        self.latest.borrow().clone()
    }

    /// Publish `payload` unless it is the payload already held.
    /// Returns whether subscribers were notified.
    pub fn next(&self, payload: SubjectPayload) -> bool {
        let mut queues = self.queues.lock();
        let changed = self.latest.send_if_modified(|current| {
            if current.same(&payload) {
                false
            } else {
                *current = payload.clone();
                true
            }
        });
        if changed {
            fan_out(&mut queues, &payload);
        }
        changed
    }

    /// Publish `payload` even if its entry is unchanged. Used when a
    /// list's member objects change but its membership does not.
    pub fn notify(&self, payload: SubjectPayload) {
        let mut queues = self.queues.lock();
        self.latest.send_replace(payload.clone());
        fan_out(&mut queues, &payload);
    }

    /// Live subscribers.
    pub fn receiver_count(&self) -> usize {
        let mut queues = self.queues.lock();
        queues.retain(|tx| !tx.is_closed());
        queues.len()
    }
}

fn fan_out(queues: &mut Vec<mpsc::UnboundedSender<SubjectPayload>>, payload: &SubjectPayload) {
    queues.retain(|tx| tx.send(payload.clone()).is_ok());
}

#[derive(Default)]
pub struct Subjects {
    subjects: HashMap<CacheKey, Arc<Subject>>,
}

impl Subjects {
    /// Existing subject for `key`, or a new one seeded from `layers`.
    pub fn get(&mut self, key: &CacheKey, layers: &Layers) -> Arc<Subject> {
        Arc::clone(
            self.subjects
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Subject::new(SubjectPayload::current(key, layers)))),
        )
    }

    pub fn peek(&self, key: &CacheKey) -> Option<&Arc<Subject>> {
        self.subjects.get(key)
    }

    /// Remove the subject. Once the last clone is gone its sender drops
    /// and every receiver observes completion.
    pub fn delete(&mut self, key: &CacheKey) -> bool {
        self.subjects.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}
