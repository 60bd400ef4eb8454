// ── Canonicalizers ──
//
// Map structurally-equal descriptors onto one shared instance so that
// cache keys can be compared by pointer. Each canonicalizer keeps two
// caches: an identity cache keyed by the exact input allocation, and a
// structural cache keyed by the fingerprint of the normalized input.

mod intersect;
mod order_by;
mod rdp;
mod rid_list;
mod where_clause;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Weak};

use dashmap::DashMap;

pub use intersect::IntersectCanonicalizer;
pub use order_by::OrderByCanonicalizer;
pub use rdp::RdpCanonicalizer;
pub use rid_list::RidListCanonicalizer;
pub use where_clause::WhereClauseCanonicalizer;

// ── Canonical ────────────────────────────────────────────────────────

/// The single shared instance of a structural class.
///
/// Equality and hashing are by pointer: two `Canonical` values from the
/// same canonicalizer are equal exactly when their inputs were
/// structurally equal.
pub struct Canonical<T>(Arc<T>);

impl<T> Canonical<T> {
    fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Stable (for this process) identity of the instance.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).addr()
    }
}

impl<T> Clone for Canonical<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Canonical<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> PartialEq for Canonical<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T> Eq for Canonical<T> {}

impl<T> Hash for Canonical<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: fmt::Debug> fmt::Debug for Canonical<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

// ── CanonicalCache ───────────────────────────────────────────────────

/// Identity and structural caches backing one canonicalizer.
pub struct CanonicalCache<I, O> {
    /// Input allocation address -> canonical. The `Weak` keeps the
    /// allocation reserved, so an address can never be reused by a
    /// different input while its entry exists.
    identity: DashMap<usize, (Weak<I>, Canonical<O>)>,
    /// Fingerprint of the normalized input -> canonical.
    structural: DashMap<String, Canonical<O>>,
}

impl<I, O> CanonicalCache<I, O> {
    pub fn new() -> Self {
        Self {
            identity: DashMap::new(),
            structural: DashMap::new(),
        }
    }

    fn lookup_identity(&self, input: &Arc<I>) -> Option<Canonical<O>> {
        let entry = self.identity.get(&Arc::as_ptr(input).addr())?;
        let (weak, canonical) = entry.value();
        std::ptr::eq(weak.as_ptr(), Arc::as_ptr(input)).then(|| canonical.clone())
    }

    fn remember_identity(&self, input: &Arc<I>, canonical: &Canonical<O>) {
        // Drop entries whose inputs are gone before growing the map.
        self.identity.retain(|_, (weak, _)| weak.strong_count() > 0);
        self.identity.insert(
            Arc::as_ptr(input).addr(),
            (Arc::downgrade(input), canonical.clone()),
        );
    }

    /// Return the stored instance for `fingerprint`, inserting `normalized`
    /// on a miss. The insert is a single entry-API write, so concurrent
    /// callers racing on one fingerprint all observe the same winner.
    fn lookup_or_create(&self, fingerprint: String, normalized: O) -> Canonical<O> {
        self.structural
            .entry(fingerprint)
            .or_insert_with(|| Canonical::new(normalized))
            .clone()
    }

    /// Number of distinct structural classes seen.
    pub fn len(&self) -> usize {
        self.structural.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structural.is_empty()
    }
}

impl<I, O> Default for CanonicalCache<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Canonicalizer ────────────────────────────────────────────────────

/// Normalizes descriptors of one kind into shared canonical instances.
pub trait Canonicalizer {
    type Input;
    type Output;

    fn cache(&self) -> &CanonicalCache<Self::Input, Self::Output>;

    /// Rewrite the input into its normal form.
    fn normalize(&self, input: &Self::Input) -> Self::Output;

    /// Deterministic string identifying the normalized structure.
    fn fingerprint(&self, normalized: &Self::Output) -> String;

    fn canonicalize(&self, input: &Self::Input) -> Canonical<Self::Output> {
        let normalized = self.normalize(input);
        let fingerprint = self.fingerprint(&normalized);
        self.cache().lookup_or_create(fingerprint, normalized)
    }

    /// Like [`canonicalize`](Self::canonicalize), but repeated calls with
    /// the same allocation skip normalization entirely.
    fn canonicalize_shared(&self, input: &Arc<Self::Input>) -> Canonical<Self::Output> {
        if let Some(hit) = self.cache().lookup_identity(input) {
            return hit;
        }
        let canonical = self.canonicalize(input);
        self.cache().remember_identity(input, &canonical);
        canonical
    }

    fn canonicalize_optional(&self, input: Option<&Arc<Self::Input>>) -> Option<Canonical<Self::Output>> {
        input.map(|i| self.canonicalize_shared(i))
    }
}
