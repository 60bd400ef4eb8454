use serde_json::Value;

use super::evaluate_filter;
use crate::model::{ObjectData, WhereClause};

/// Whether `object` satisfies `clause`.
///
/// Under `$not` the strictness flips: an object definitely fails `x` only
/// if it cannot possibly match `x`.
pub fn object_matches_where_clause(object: &ObjectData, clause: &WhereClause, strict: bool) -> bool {
    match clause {
        WhereClause::And(children) => children
            .iter()
            .all(|c| object_matches_where_clause(object, c, strict)),
        WhereClause::Or(children) => children
            .iter()
            .any(|c| object_matches_where_clause(object, c, strict)),
        WhereClause::Not(inner) => !object_matches_where_clause(object, inner, !strict),
        WhereClause::Filter(filter) => {
            let actual = object.get(&filter.property).unwrap_or(Value::Null);
            evaluate_filter(filter.operator, &actual, &filter.value, strict)
        }
    }
}
