// ── Local filter evaluation ──
//
// Decides whether a cached object satisfies a where-clause without asking
// the server. `strict` evaluation answers "definitely matches"; non-strict
// answers "might match". The two only diverge on operators that cannot be
// decided locally.

mod matches;
mod operator;

use std::cmp::Ordering;
use std::str::FromStr;

use serde_json::Value;

pub use matches::object_matches_where_clause;
pub use operator::FilterOperator;

/// Evaluate one operator against an actual property value.
///
/// Missing properties are passed as `Value::Null`.
pub fn evaluate_filter(operator: FilterOperator, actual: &Value, expected: &Value, strict: bool) -> bool {
    match operator {
        FilterOperator::Eq => values_equal(actual, expected),
        FilterOperator::Ne => !values_equal(actual, expected),
        FilterOperator::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
        FilterOperator::Gte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::Lt => compare_values(actual, expected) == Some(Ordering::Less),
        FilterOperator::Lte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::In => match expected {
            Value::Array(candidates) => candidates.iter().any(|c| values_equal(actual, c)),
            _ => false,
        },
        FilterOperator::IsNull => {
            let want_null = expected.as_bool().unwrap_or(true);
            actual.is_null() == want_null
        }
        FilterOperator::StartsWith => match (actual, expected) {
            (Value::String(a), Value::String(prefix)) => a.starts_with(prefix.as_str()),
            _ => false,
        },
        FilterOperator::Contains
        | FilterOperator::ContainsAnyTerm
        | FilterOperator::ContainsAllTerms
        | FilterOperator::ContainsAllTermsInOrder
        | FilterOperator::Intersects
        | FilterOperator::Within => !strict,
    }
}

/// Evaluate an operator given by name.
///
/// Unknown names are a programming error: debug builds panic, release
/// builds fail open by treating the operator as not locally decidable.
pub fn evaluate_filter_str(operator: &str, actual: &Value, expected: &Value, strict: bool) -> bool {
    match FilterOperator::from_str(operator) {
        Ok(op) => evaluate_filter(op, actual, expected, strict),
        Err(_) => {
            debug_assert!(false, "unknown filter operator {operator}");
            !strict
        }
    }
}

/// Equality with numeric coercion, so `1` and `1.0` are equal.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Order two property values of the same kind. Numbers compare
/// numerically, strings lexicographically (which also orders ISO-8601
/// timestamps), booleans false-first. Mixed kinds and nulls are unordered.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(op: FilterOperator, actual: Value, expected: Value) -> (bool, bool) {
        (
            evaluate_filter(op, &actual, &expected, true),
            evaluate_filter(op, &actual, &expected, false),
        )
    }

    #[test]
    fn equality() {
        assert_eq!(eval(FilterOperator::Eq, json!(1), json!(1.0)), (true, true));
        assert_eq!(eval(FilterOperator::Eq, json!("a"), json!("b")), (false, false));
        assert_eq!(eval(FilterOperator::Ne, json!("a"), json!("b")), (true, true));
        assert_eq!(eval(FilterOperator::Ne, Value::Null, json!("b")), (true, true));
    }

    #[test]
    fn ordering_numbers() {
        assert_eq!(eval(FilterOperator::Gt, json!(5), json!(3)), (true, true));
        assert_eq!(eval(FilterOperator::Gt, json!(3), json!(3)), (false, false));
        assert_eq!(eval(FilterOperator::Gte, json!(3), json!(3)), (true, true));
        assert_eq!(eval(FilterOperator::Lt, json!(2.5), json!(3)), (true, true));
        assert_eq!(eval(FilterOperator::Lte, json!(4), json!(3)), (false, false));
    }

    #[test]
    fn ordering_strings_and_dates() {
        assert_eq!(eval(FilterOperator::Lt, json!("apple"), json!("banana")), (true, true));
        assert_eq!(
            eval(FilterOperator::Gt, json!("2024-03-01T00:00:00Z"), json!("2024-02-29T23:59:59Z")),
            (true, true)
        );
    }

    #[test]
    fn ordering_against_missing_never_matches() {
        assert_eq!(eval(FilterOperator::Gt, Value::Null, json!(3)), (false, false));
        assert_eq!(eval(FilterOperator::Lte, json!("3"), json!(3)), (false, false));
    }

    #[test]
    fn membership() {
        assert_eq!(eval(FilterOperator::In, json!(2), json!([1, 2, 3])), (true, true));
        assert_eq!(eval(FilterOperator::In, json!(4), json!([1, 2, 3])), (false, false));
        assert_eq!(eval(FilterOperator::In, json!(4), json!(4)), (false, false));
    }

    #[test]
    fn null_checks() {
        assert_eq!(eval(FilterOperator::IsNull, Value::Null, json!(true)), (true, true));
        assert_eq!(eval(FilterOperator::IsNull, json!(0), json!(true)), (false, false));
        assert_eq!(eval(FilterOperator::IsNull, json!(0), json!(false)), (true, true));
    }

    #[test]
    fn prefix() {
        assert_eq!(eval(FilterOperator::StartsWith, json!("foobar"), json!("foo")), (true, true));
        assert_eq!(eval(FilterOperator::StartsWith, json!("barfoo"), json!("foo")), (false, false));
        assert_eq!(eval(FilterOperator::StartsWith, json!(12), json!("1")), (false, false));
    }

    #[test]
    fn non_local_operators_diverge_on_strictness() {
        for op in [
            FilterOperator::Contains,
            FilterOperator::ContainsAnyTerm,
            FilterOperator::ContainsAllTerms,
            FilterOperator::ContainsAllTermsInOrder,
            FilterOperator::Intersects,
            FilterOperator::Within,
        ] {
            assert_eq!(eval(op, json!("anything"), json!("x")), (false, true), "{op}");
        }
    }

    #[test]
    fn named_operators_dispatch() {
        assert!(evaluate_filter_str("$eq", &json!(1), &json!(1), true));
        assert!(!evaluate_filter_str("$within", &json!(1), &json!(1), true));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unknown filter operator")]
    fn unknown_operator_asserts_in_debug() {
        evaluate_filter_str("$nearby", &json!(1), &json!(1), true);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn unknown_operator_fails_open_in_release() {
        assert!(!evaluate_filter_str("$nearby", &json!(1), &json!(1), true));
        assert!(evaluate_filter_str("$nearby", &json!(1), &json!(1), false));
    }

    #[test]
    fn compare_values_orders_booleans() {
        assert_eq!(compare_values(&json!(false), &json!(true)), Some(Ordering::Less));
        assert_eq!(compare_values(&json!(null), &json!(true)), None);
    }
}
