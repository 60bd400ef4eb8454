// ── Ontology object payloads ──
//
// The data the wire layer hands back for a single object. Properties are
// kept as raw JSON because object types are only known at runtime.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::primary_key::{ObjectRef, PrimaryKey};

/// One ontology object as returned by the wire layer.
///
/// Derived (RDP) properties arrive merged into `properties` on list pages;
/// the store splits them out into `RdpStorage` before caching the base
/// object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    #[serde(rename = "$objectType")]
    pub object_type: String,
    #[serde(rename = "$primaryKey")]
    pub primary_key: PrimaryKey,
    #[serde(rename = "$rid", default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl ObjectData {
    pub fn new(object_type: impl Into<String>, primary_key: impl Into<PrimaryKey>) -> Self {
        Self {
            object_type: object_type.into(),
            primary_key: primary_key.into(),
            rid: None,
            properties: Map::new(),
        }
    }

    pub fn with_rid(mut self, rid: impl Into<String>) -> Self {
        self.rid = Some(rid.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Look up a property, including the `$primaryKey` / `$rid` pseudo
    /// properties that where-clauses may filter on.
    pub fn get(&self, property: &str) -> Option<Value> {
        match property {
            "$primaryKey" => Some(self.primary_key.to_json()),
            "$rid" => self.rid.as_deref().map(Value::from),
            "$objectType" => Some(Value::from(self.object_type.as_str())),
            _ => self.properties.get(property).cloned(),
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            object_type: self.object_type.clone(),
            primary_key: self.primary_key.clone(),
        }
    }

    /// Split derived properties out of a wire payload.
    ///
    /// Returns the base object (without the named properties) and the
    /// removed values. Names absent from the payload are skipped.
    pub fn split_derived<'a>(
        mut self,
        derived: impl IntoIterator<Item = &'a String>,
    ) -> (Self, Map<String, Value>) {
        let mut extracted = Map::new();
        for name in derived {
            if let Some(value) = self.properties.remove(name) {
                extracted.insert(name.clone(), value);
            }
        }
        (self, extracted)
    }

    /// Overlay derived values onto a copy of this object.
    pub fn merged_with(&self, derived: &Map<String, Value>) -> Self {
        let mut merged = self.clone();
        for (name, value) in derived {
            merged.properties.insert(name.clone(), value.clone());
        }
        merged
    }
}
