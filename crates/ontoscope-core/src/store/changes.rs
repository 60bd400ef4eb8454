use std::collections::HashSet;
use std::sync::Arc;

use super::cache_key::CacheKey;
use crate::model::ObjectData;

/// Where a batch of writes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ChangeOrigin {
    /// Results of a list page fetch. These never trigger further list
    /// revalidation, which would let two lists refetch each other forever.
    ListFetch,
    #[default]
    Other,
}

/// Objects and lists written during one batch.
#[derive(Debug, Default)]
pub(crate) struct Changes {
    pub origin: ChangeOrigin,
    pub added: Vec<(CacheKey, Arc<ObjectData>)>,
    pub modified: Vec<(CacheKey, Arc<ObjectData>)>,
    pub deleted: Vec<CacheKey>,
    pub modified_lists: HashSet<CacheKey>,
}

impl Changes {
    pub fn has_object_changes(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }

    /// Added and modified objects of one type.
    pub fn upserts_of<'a>(
        &'a self,
        object_type: &'a str,
    ) -> impl Iterator<Item = &'a (CacheKey, Arc<ObjectData>)> + 'a {
        self.added
            .iter()
            .chain(self.modified.iter())
            .filter(move |(key, _)| key.object_type() == object_type)
    }

    pub fn deleted_of<'a>(&'a self, object_type: &'a str) -> impl Iterator<Item = &'a CacheKey> + 'a {
        self.deleted
            .iter()
            .filter(move |key| key.object_type() == object_type)
    }
}
