// ── Per-key query orchestration ──
//
// Object and list queries own the fetch lifecycle of one cache key: which
// fetch is current, how to cancel it, and how its results are folded into
// the store. The async halves run as spawned tasks; everything that
// touches cache state happens inside one store batch.

pub(crate) mod list;
pub(crate) mod object;

use futures_util::future::{BoxFuture, Shared};
use tokio_util::sync::CancellationToken;

pub use list::AutoFetchMore;

pub(crate) type SharedFetch = Shared<BoxFuture<'static, ()>>;

/// Tracks the current fetch for one query.
///
/// Every fetch gets a generation number. Results from a fetch that is no
/// longer current are discarded, so a slow response can never overwrite
/// a newer one.
#[derive(Default)]
pub(crate) struct FetchSlot {
    generation: u64,
    cancel: Option<CancellationToken>,
    in_flight: Option<SharedFetch>,
}

impl FetchSlot {
    /// Supersede any current fetch and start a new generation.
    pub fn begin(&mut self, parent: &CancellationToken) -> (u64, CancellationToken) {
        self.cancel();
        let token = parent.child_token();
        self.cancel = Some(token.clone());
        (self.generation, token)
    }

    pub fn attach(&mut self, generation: u64, fetch: SharedFetch) {
        if self.is_current(generation) {
            self.in_flight = Some(fetch);
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.cancel.is_some()
    }

    /// Mark `generation` done. Returns whether it was still current.
    pub fn finish(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.cancel = None;
        self.in_flight = None;
        true
    }

    /// Cancel the current fetch, if any. Its results will be discarded.
    pub fn cancel(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.in_flight = None;
        self.generation += 1;
    }

    pub fn in_flight(&self) -> Option<SharedFetch> {
        self.in_flight.clone()
    }
}
