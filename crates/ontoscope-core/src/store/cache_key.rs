// ── Cache keys ──
//
// A CacheKey is an identity handle: two keys are equal only if they are
// the same allocation. The registry interns keys by their structural
// parts, so one logical query maps to one key for as long as the key is
// registered.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::canonical::Canonical;
use crate::model::{OrderBy, PrimaryKey, RdpConfig, WhereClause};

/// Structural identity of an object cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKeyParts {
    pub object_type: String,
    pub primary_key: PrimaryKey,
}

/// Structural identity of a list cache slot. All descriptor parts are
/// canonical, so equality here is pointer equality on the parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKeyParts {
    pub object_type: String,
    pub where_clause: Canonical<WhereClause>,
    pub order_by: Canonical<OrderBy>,
    pub rids: Option<Canonical<Vec<String>>>,
    pub intersect_with: Option<Canonical<Vec<Canonical<WhereClause>>>>,
    pub rdp: Option<Canonical<RdpConfig>>,
}

/// Structural identity of the objects reached from one object through a
/// named link, optionally filtered and ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKeyParts {
    pub source_type: String,
    pub source_primary_key: PrimaryKey,
    pub link_name: String,
    pub where_clause: Canonical<WhereClause>,
    pub order_by: Canonical<OrderBy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyParts {
    Object(ObjectKeyParts),
    List(ListKeyParts),
    Link(LinkKeyParts),
}

/// Identity handle for one cache slot.
#[derive(Clone)]
pub struct CacheKey(Arc<KeyParts>);

impl CacheKey {
    pub fn parts(&self) -> &KeyParts {
        &self.0
    }

    /// The object type of the slot. A link slot reports its source type.
    pub fn object_type(&self) -> &str {
        match &*self.0 {
            KeyParts::Object(o) => &o.object_type,
            KeyParts::List(l) => &l.object_type,
            KeyParts::Link(l) => &l.source_type,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectKeyParts> {
        match &*self.0 {
            KeyParts::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListKeyParts> {
        match &*self.0 {
            KeyParts::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&LinkKeyParts> {
        match &*self.0 {
            KeyParts::Link(l) => Some(l),
            _ => None,
        }
    }

    /// Whether the slot holds a member list (a list query or a link).
    pub fn is_list(&self) -> bool {
        !matches!(&*self.0, KeyParts::Object(_))
    }

    /// Ordering applied to the members of a list or link slot.
    pub fn order_by(&self) -> Option<&Canonical<OrderBy>> {
        match &*self.0 {
            KeyParts::Object(_) => None,
            KeyParts::List(l) => Some(&l.order_by),
            KeyParts::Link(l) => Some(&l.order_by),
        }
    }

    /// Derived properties shown by a list slot.
    pub fn rdp(&self) -> Option<&Canonical<RdpConfig>> {
        self.as_list().and_then(|l| l.rdp.as_ref())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).addr().hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            KeyParts::Object(o) => write!(f, "object:{}:{}", o.object_type, o.primary_key),
            KeyParts::List(l) => write!(f, "list:{}:{}", l.object_type, l.where_clause.to_json()),
            KeyParts::Link(l) => write!(
                f,
                "link:{}:{}:{}:{}",
                l.source_type,
                l.source_primary_key,
                l.link_name,
                l.where_clause.to_json()
            ),
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────

/// Interns cache keys by their structural parts.
#[derive(Default)]
pub(crate) struct CacheKeys {
    keys: HashMap<KeyParts, CacheKey>,
}

impl CacheKeys {
    /// Return the live key for `parts`, minting one on first use.
    /// The flag reports whether the key is new.
    pub(crate) fn get(&mut self, parts: KeyParts) -> (CacheKey, bool) {
        if let Some(key) = self.keys.get(&parts) {
            return (key.clone(), false);
        }
        let key = CacheKey(Arc::new(parts.clone()));
        self.keys.insert(parts, key.clone());
        (key, true)
    }

    pub(crate) fn lookup(&self, parts: &KeyParts) -> Option<&CacheKey> {
        self.keys.get(parts)
    }

    pub(crate) fn remove(&mut self, key: &CacheKey) -> bool {
        match self.keys.get(key.parts()) {
            Some(live) if live == key => self.keys.remove(key.parts()).is_some(),
            _ => false,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CacheKey> {
        self.keys.values()
    }
}
