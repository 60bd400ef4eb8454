// ── Where-clause descriptors ──
//
// Caller-supplied filter trees. The JSON form follows the `$`-prefixed DSL
// (`$and`, `$or`, `$not`, `{prop: {$op: value}}`, shorthand `{prop: value}`).
// Clauses are never mutated by the cache, only canonicalized.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::filter::FilterOperator;

/// A filter tree over the properties of one object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum WhereClause {
    And(Vec<WhereClause>),
    Or(Vec<WhereClause>),
    Not(Box<WhereClause>),
    Filter(PropertyFilter),
}

/// A single `property $op value` leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    pub property: String,
    pub operator: FilterOperator,
    pub value: Value,
}

/// An extra where-clause a list must also satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectWith {
    #[serde(rename = "where")]
    pub where_clause: Arc<WhereClause>,
}

impl WhereClause {
    /// The empty clause `{}`, which matches every object.
    pub fn all() -> Self {
        Self::And(Vec::new())
    }

    pub fn filter(property: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self::Filter(PropertyFilter {
            property: property.into(),
            operator,
            value: value.into(),
        })
    }

    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::filter(property, FilterOperator::Eq, value)
    }

    pub fn and(children: impl IntoIterator<Item = WhereClause>) -> Self {
        Self::And(children.into_iter().collect())
    }

    pub fn or(children: impl IntoIterator<Item = WhereClause>) -> Self {
        Self::Or(children.into_iter().collect())
    }

    pub fn not(inner: WhereClause) -> Self {
        Self::Not(Box::new(inner))
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::And(children) if children.is_empty())
    }

    /// Parse the JSON DSL form.
    pub fn from_json(value: &Value) -> Result<Self, CoreError> {
        let Value::Object(map) = value else {
            return Err(CoreError::ValidationFailed {
                message: format!("where clause must be a JSON object, got {value}"),
            });
        };

        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                "$and" => clauses.push(Self::And(parse_children(key, value)?)),
                "$or" => clauses.push(Self::Or(parse_children(key, value)?)),
                "$not" => clauses.push(Self::not(Self::from_json(value)?)),
                property => clauses.extend(parse_property(property, value)?),
            }
        }

        Ok(match clauses.len() {
            1 => clauses.remove(0),
            _ => Self::And(clauses),
        })
    }

    /// Explicit JSON form. Every leaf is written as `{prop: {$op: value}}`,
    /// so structurally equal trees always render identically.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        match self {
            Self::And(children) if children.is_empty() => {}
            Self::And(children) => {
                map.insert("$and".into(), children.iter().map(Self::to_json).collect());
            }
            Self::Or(children) => {
                map.insert("$or".into(), children.iter().map(Self::to_json).collect());
            }
            Self::Not(inner) => {
                map.insert("$not".into(), inner.to_json());
            }
            Self::Filter(filter) => {
                let mut op = Map::new();
                op.insert(filter.operator.to_string(), filter.value.clone());
                map.insert(filter.property.clone(), Value::Object(op));
            }
        }
        Value::Object(map)
    }
}

fn parse_children(key: &str, value: &Value) -> Result<Vec<WhereClause>, CoreError> {
    let Value::Array(items) = value else {
        return Err(CoreError::ValidationFailed {
            message: format!("{key} expects an array of clauses"),
        });
    };
    items.iter().map(WhereClause::from_json).collect()
}

fn parse_property(property: &str, value: &Value) -> Result<Vec<WhereClause>, CoreError> {
    let operators = match value {
        Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => ops,
        // Shorthand equality, including object-valued properties.
        _ => return Ok(vec![WhereClause::eq(property, value.clone())]),
    };

    operators
        .iter()
        .map(|(op, expected)| {
            let operator = FilterOperator::from_str(op).map_err(|_| CoreError::ValidationFailed {
                message: format!("unknown filter operator {op} on property {property}"),
            })?;
            Ok(WhereClause::filter(property, operator, expected.clone()))
        })
        .collect()
}

impl TryFrom<Value> for WhereClause {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

impl From<WhereClause> for Value {
    fn from(clause: WhereClause) -> Self {
        clause.to_json()
    }
}

impl Default for WhereClause {
    fn default() -> Self {
        Self::all()
    }
}
