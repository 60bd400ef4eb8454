use std::sync::Arc;

use chrono::{DateTime, Utc};
use strum::{AsRefStr, Display};

use super::cache_key::CacheKey;
use crate::error::CoreError;
use crate::model::ObjectData;

/// Load status of a cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    Init,
    Loading,
    Loaded,
    Error,
}

/// Member keys of a cached list, in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListData {
    pub members: Vec<CacheKey>,
}

/// Value held by an entry.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Object(Arc<ObjectData>),
    List(Arc<ListData>),
    /// The object is known to be deleted.
    Tombstone,
}

impl CacheValue {
    /// Reference identity. Tombstones are all the same value.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            (Self::Tombstone, Self::Tombstone) => true,
            _ => false,
        }
    }
}

pub(crate) fn same_value(a: Option<&CacheValue>, b: Option<&CacheValue>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.same(b),
        (None, None) => true,
        _ => false,
    }
}

/// Immutable versioned record for one cache slot. Every write creates a
/// new `Arc<Entry>`, so change detection is a pointer comparison.
#[derive(Debug, Clone)]
pub struct Entry {
    pub cache_key: CacheKey,
    pub value: Option<CacheValue>,
    pub status: Status,
    pub last_updated: DateTime<Utc>,
    pub error: Option<Arc<CoreError>>,
}

impl Entry {
    pub(crate) fn new(cache_key: CacheKey, value: Option<CacheValue>, status: Status) -> Self {
        Self {
            cache_key,
            value,
            status,
            last_updated: Utc::now(),
            error: None,
        }
    }

    /// Placeholder for a slot that has never been written.
    pub(crate) fn init(cache_key: CacheKey) -> Self {
        Self {
            cache_key,
            value: None,
            status: Status::Init,
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
            error: None,
        }
    }

    pub(crate) fn with_error(mut self, error: Arc<CoreError>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn object(&self) -> Option<&Arc<ObjectData>> {
        match &self.value {
            Some(CacheValue::Object(o)) => Some(o),
            _ => None,
        }
    }

    pub fn list(&self) -> Option<&Arc<ListData>> {
        match &self.value {
            Some(CacheValue::List(l)) => Some(l),
            _ => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.value, Some(CacheValue::Tombstone))
    }
}
