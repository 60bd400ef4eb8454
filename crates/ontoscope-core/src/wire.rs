// ── Wire layer seam ──
//
// The cache never speaks HTTP itself. Callers hand an `ObservableClient` a
// `WireClient` implementation that performs the actual requests; the
// cache only depends on this trait and on `WireError`.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::canonical::Canonical;
use crate::model::{
    ActionDefinition, ActionResult, ActionValidation, ObjectData, OrderBy, PrimaryKey, RdpConfig,
    WhereClause,
};

/// Failures reported by a wire implementation.
#[derive(Debug, Clone, Error)]
pub enum WireError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("{object_type} {primary_key} does not exist")]
    NotFound {
        object_type: String,
        primary_key: String,
    },

    #[error("Rejected by server: {message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },

    #[error("Could not decode response: {message}")]
    Deserialization { message: String },

    #[error("Not supported by this wire client: {0}")]
    Unsupported(&'static str),
}

/// One page request for a list query. All descriptors are canonical.
#[derive(Debug, Clone)]
pub struct ListPageRequest {
    pub object_type: String,
    pub where_clause: Canonical<WhereClause>,
    pub order_by: Canonical<OrderBy>,
    pub rids: Option<Canonical<Vec<String>>>,
    pub intersect_with: Option<Canonical<Vec<Canonical<WhereClause>>>>,
    pub with_properties: Option<Canonical<RdpConfig>>,
    pub page_size: usize,
    pub page_token: Option<String>,
}

/// One page request for the objects linked from a source object.
#[derive(Debug, Clone)]
pub struct LinkPageRequest {
    pub source_type: String,
    pub source_primary_key: PrimaryKey,
    pub link_name: String,
    pub where_clause: Canonical<WhereClause>,
    pub order_by: Canonical<OrderBy>,
    pub page_size: usize,
    pub page_token: Option<String>,
}

/// One page of list results. Derived properties requested through
/// `with_properties` are merged into each object's properties.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub data: Vec<ObjectData>,
    pub next_page_token: Option<String>,
}

/// Requests the cache needs from the server.
#[async_trait]
pub trait WireClient: Send + Sync {
    async fn fetch_object(
        &self,
        object_type: &str,
        primary_key: &PrimaryKey,
        select: Option<&[String]>,
    ) -> Result<ObjectData, WireError>;

    async fn fetch_list_page(&self, request: &ListPageRequest) -> Result<ListPage, WireError>;

    /// Load one page of the objects a source object links to.
    async fn fetch_link_page(&self, _request: &LinkPageRequest) -> Result<ListPage, WireError> {
        Err(WireError::Unsupported("fetch_link_page"))
    }

    async fn apply_action(
        &self,
        action: &ActionDefinition,
        args: &Value,
    ) -> Result<ActionResult, WireError>;

    /// Validate action arguments without applying them.
    async fn validate_action(
        &self,
        _action: &ActionDefinition,
        _args: &Value,
    ) -> Result<ActionValidation, WireError> {
        Err(WireError::Unsupported("validate_action"))
    }
}
