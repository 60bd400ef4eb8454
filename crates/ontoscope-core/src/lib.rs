// ontoscope-core: Reactive, layered cache of ontology objects and lists.

pub mod canonical;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod model;
pub mod optimistic;
pub mod query;
pub mod store;
pub mod stream;
pub mod wire;

// ── Primary re-exports ──────────────────────────────────────────────
pub use canonical::{Canonical, Canonicalizer};
pub use client::{
    ApplyActionOptions, ObservableClient, ObserveLinksOptions, ObserveListOptions, ObserveMode,
    ObserveObjectOptions,
};
pub use config::StoreConfig;
pub use error::CoreError;
pub use optimistic::OptimisticUpdate;
pub use query::AutoFetchMore;
pub use store::{CacheKey, Status};
pub use stream::{
    ListObservation, ListPayload, ObjectObservation, ObjectPayload, ObservationStream, Observer,
    Subscription, Unsubscribable,
};
pub use wire::{LinkPageRequest, ListPage, ListPageRequest, WireClient, WireError};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ActionDefinition, ActionResult, ActionValidation, IntersectWith, ObjectData, ObjectEdit,
    ObjectRef, OrderBy, PrimaryKey, PropertyFilter, RdpConfig, SortDirection, ValidationResult,
    WhereClause,
};
pub use filter::FilterOperator;
