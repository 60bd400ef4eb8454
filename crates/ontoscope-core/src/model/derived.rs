// ── Runtime derived properties ──
//
// An RdpConfig names the derived properties a list wants computed
// server-side, keyed by the property name they are returned under.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Derived property definitions keyed by output name. The definitions are
/// opaque to the cache; only their structure matters for canonicalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RdpConfig(pub BTreeMap<String, Value>);

impl RdpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, definition: Value) -> Self {
        self.0.insert(name.into(), definition);
        self
    }

    pub fn property_names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Computed derived values for one object under one config.
pub type RdpData = Arc<Map<String, Value>>;
