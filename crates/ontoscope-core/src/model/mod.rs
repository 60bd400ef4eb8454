// ── Domain model ──
//
// Object payloads and the query descriptors callers hand to the cache.

mod action;
mod derived;
mod object;
mod ordering;
mod primary_key;
mod where_clause;

pub use action::{ActionDefinition, ActionResult, ActionValidation, ObjectEdit, ValidationResult};
pub use derived::{RdpConfig, RdpData};
pub use object::ObjectData;
pub use ordering::{OrderBy, SortDirection};
pub use primary_key::{ObjectRef, PrimaryKey};
pub use where_clause::{IntersectWith, PropertyFilter, WhereClause};
