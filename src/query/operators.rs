use std::cmp::Ordering;

use serde_json::Value;

/// Evaluates a single `$`-operator against a resolved document field.
///
/// `field` is `None` when the path did not resolve; `$exists` is the only
/// operator that distinguishes a missing field from a present `null`.
/// Range operators compare numerically when both operands are numbers and
/// lexicographically when both are strings; any other pairing is a non-match
/// rather than an error. Unknown operators never match.
pub fn evaluate(op: &str, field: Option<&Value>, target: &Value) -> bool {
    match op {
        "$eq" => scalar_eq(field, target),
        "$ne" => !scalar_eq(field, target),

        "$gt" => compare_ordered(field, target, |ord| ord == Ordering::Greater),
        "$gte" => compare_ordered(field, target, |ord| ord != Ordering::Less),
        "$lt" => compare_ordered(field, target, |ord| ord == Ordering::Less),
        "$lte" => compare_ordered(field, target, |ord| ord != Ordering::Greater),

        "$in" => membership(field, target),
        "$nin" => target.is_array() && !membership(field, target),

        "$exists" => match target.as_bool() {
            Some(expected) => field.is_some() == expected,
            None => false,
        },

        _ => false,
    }
}

/// Structural equality with numeric unification: integers and floats with the
/// same value are equal. A `null` target also matches a missing field.
pub fn scalar_eq(field: Option<&Value>, target: &Value) -> bool {
    match field {
        None => target.is_null(),
        Some(value) => {
            if let (Some(a), Some(b)) = (value.as_f64(), target.as_f64()) {
                a == b
            } else {
                value == target
            }
        }
    }
}

fn compare_ordered<F>(field: Option<&Value>, target: &Value, accept: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    let value = match field {
        Some(v) => v,
        None => return false,
    };

    if let (Some(a), Some(b)) = (value.as_f64(), target.as_f64()) {
        return a.partial_cmp(&b).map_or(false, accept);
    }
    if let (Some(a), Some(b)) = (value.as_str(), target.as_str()) {
        return accept(a.cmp(b));
    }
    false
}

fn membership(field: Option<&Value>, target: &Value) -> bool {
    match target.as_array() {
        Some(candidates) => candidates.iter().any(|c| scalar_eq(field, c)),
        None => false,
    }
}
