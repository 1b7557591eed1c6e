use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind, Result};
use crate::query::operators;
use crate::query::path;

/// Evaluates a query document against one document.
///
/// Each entry maps a dot-separated field path to a predicate; entries combine
/// with logical AND and an empty query matches every document. A predicate
/// object whose keys all begin with `$` is an operator expression; any other
/// predicate requires structural equality (with numeric unification, and with
/// `null` also matching an absent field).
pub fn matches(doc: &Value, query: &Value) -> bool {
    let conditions = match query.as_object() {
        Some(q) => q,
        None => return true,
    };

    for (field_path, predicate) in conditions {
        let field = path::lookup(doc, field_path);
        match predicate.as_object() {
            Some(pred) if is_operator_object(pred) => {
                for (op, target) in pred {
                    if !operators::evaluate(op, field, target) {
                        return false;
                    }
                }
            }
            _ => {
                if !operators::scalar_eq(field, predicate) {
                    return false;
                }
            }
        }
    }
    true
}

fn is_operator_object(pred: &Map<String, Value>) -> bool {
    !pred.is_empty() && pred.keys().all(|key| key.starts_with('$'))
}

/// Filters, sorts, paginates, and projects a snapshot of documents.
///
/// `limit == 0` means unlimited. The result is a fresh array of deep copies;
/// callers never share memory with the store.
pub fn find(
    docs: &[Arc<Value>],
    query: &Value,
    sort: &Value,
    projection: &Value,
    limit: usize,
    skip: usize,
) -> Result<Vec<Value>> {
    let mode = projection_mode(projection)?;

    let mut results: Vec<&Arc<Value>> = docs
        .iter()
        .filter(|doc| matches(doc.as_ref(), query))
        .collect();

    if let Some(sort_obj) = sort.as_object() {
        if !sort_obj.is_empty() {
            // Vec::sort_by is stable, so ties keep insertion order.
            results.sort_by(|a, b| {
                for (key, direction) in sort_obj {
                    let cmp = compare_fields(path::lookup(a.as_ref(), key), path::lookup(b.as_ref(), key));
                    if cmp != Ordering::Equal {
                        return if direction.as_i64() == Some(-1) {
                            cmp.reverse()
                        } else {
                            cmp
                        };
                    }
                }
                Ordering::Equal
            });
        }
    }

    let total = results.len();
    if skip >= total {
        return Ok(Vec::new());
    }
    let end = if limit > 0 {
        (skip + limit).min(total)
    } else {
        total
    };

    Ok(results[skip..end]
        .iter()
        .map(|doc| project(doc.as_ref(), &mode))
        .collect())
}

/// Number of documents matching the query.
pub fn count(docs: &[Arc<Value>], query: &Value) -> usize {
    docs.iter()
        .filter(|doc| matches(doc.as_ref(), query))
        .count()
}

/// Cross-type sort order: missing fields sort before present ones, then
/// null < bool < number < string < array/object. Arrays and objects have no
/// relative order among themselves.
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx.partial_cmp(&fy).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

enum Projection<'a> {
    Passthrough,
    Include { fields: Vec<&'a str>, keep_id: bool },
    Exclude { fields: Vec<&'a str> },
}

/// Classifies a projection document.
///
/// Values of 1/true select inclusion mode (listed fields plus `_id`), values
/// of 0/false exclusion mode. Mixing the two is rejected, with `_id: 0` as
/// the one allowed exception inside an inclusion projection.
fn projection_mode(projection: &Value) -> Result<Projection> {
    let proj = match projection.as_object() {
        Some(p) if !p.is_empty() => p,
        _ => return Ok(Projection::Passthrough),
    };

    let mut includes = Vec::new();
    let mut excludes = Vec::new();
    let mut suppress_id = false;

    for (key, value) in proj {
        let truthy = value.as_i64() == Some(1) || value.as_bool() == Some(true);
        let falsy = value.as_i64() == Some(0) || value.as_bool() == Some(false);
        if truthy {
            includes.push(key.as_str());
        } else if falsy {
            if key == "_id" {
                suppress_id = true;
            } else {
                excludes.push(key.as_str());
            }
        } else {
            return Err(Error::new(
                ErrorKind::InvalidQuery,
                format!("Projection value for '{}' must be 0 or 1", key),
            ));
        }
    }

    match (includes.is_empty(), excludes.is_empty()) {
        (false, true) => Ok(Projection::Include {
            fields: includes,
            keep_id: !suppress_id,
        }),
        (true, true) => Ok(Projection::Exclude {
            // Only `_id: 0` was given.
            fields: vec!["_id"],
        }),
        (true, false) => {
            if suppress_id {
                excludes.push("_id");
            }
            Ok(Projection::Exclude { fields: excludes })
        }
        (false, false) => Err(Error::new(
            ErrorKind::InvalidQuery,
            "Cannot mix inclusion and exclusion in a projection",
        )),
    }
}

fn project(doc: &Value, mode: &Projection) -> Value {
    let doc_obj = match doc.as_object() {
        Some(obj) => obj,
        None => return doc.clone(),
    };

    match mode {
        Projection::Passthrough => doc.clone(),
        Projection::Include { fields, keep_id } => {
            let mut out = Map::new();
            for key in fields {
                if let Some(value) = doc_obj.get(*key) {
                    out.insert((*key).to_string(), value.clone());
                }
            }
            if *keep_id && !out.contains_key("_id") {
                if let Some(id) = doc_obj.get("_id") {
                    out.insert("_id".to_string(), id.clone());
                }
            }
            Value::Object(out)
        }
        Projection::Exclude { fields } => {
            let mut out = doc_obj.clone();
            for key in fields {
                out.remove(*key);
            }
            Value::Object(out)
        }
    }
}
