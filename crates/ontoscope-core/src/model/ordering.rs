use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Sort direction for one ordering property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Ordered list of sort properties. Insertion order is significant: the
/// first property is the primary sort key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderBy(pub IndexMap<String, SortDirection>);

impl OrderBy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, property: impl Into<String>) -> Self {
        self.0.insert(property.into(), SortDirection::Asc);
        self
    }

    pub fn desc(mut self, property: impl Into<String>) -> Self {
        self.0.insert(property.into(), SortDirection::Desc);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SortDirection)> {
        self.0.iter()
    }
}
