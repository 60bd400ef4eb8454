use futures_util::StreamExt;
use tokio::task::JoinHandle;

use super::ObservationStream;

/// Callback-style consumer of observation payloads.
///
/// Closures taking the payload implement this directly.
pub trait Observer<T>: Send + 'static {
    fn next(&mut self, value: T);

    /// Called once the observed key is cleaned up or the client shuts
    /// down. Not called after `unsubscribe()`.
    fn complete(&mut self) {}
}

impl<T, F> Observer<T> for F
where
    F: FnMut(T) + Send + 'static,
{
    fn next(&mut self, value: T) {
        self(value);
    }
}

/// Anything that holds a reference on a cache key. Unsubscribing is
/// idempotent, and dropping the handle unsubscribes too.
pub trait Unsubscribable {
    fn unsubscribe(&mut self);
}

/// A running observer delivery task.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn spawn<T: Send + 'static>(mut stream: ObservationStream<T>, mut observer: impl Observer<T>) -> Self {
        let task = tokio::spawn(async move {
            while let Some(value) = stream.next().await {
                observer.next(value);
            }
            observer.complete();
        });
        Self { task: Some(task) }
    }

    /// Whether delivery has stopped, by unsubscribe or completion.
    pub fn is_closed(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Unsubscribable for Subscription {
    fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
