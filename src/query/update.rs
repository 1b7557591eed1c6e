use std::sync::Arc;

use serde_json::{Map, Number, Value};

use crate::core::error::{Error, ErrorKind, Result};
use crate::query::executor;
use crate::query::path;

/// Applies an update document to every match in a snapshot of the live
/// sequence, returning the new sequence and the number of documents changed.
///
/// An update document consisting solely of `$`-operators is applied
/// operator-by-operator; one without any `$`-keys replaces each match
/// wholesale. The `_id` of a matched document is immutable either way. Any
/// error leaves the caller's state untouched because the input is never
/// mutated in place.
pub fn apply(
    docs: &[Arc<Value>],
    query: &Value,
    update: &Value,
) -> Result<(Vec<Arc<Value>>, usize)> {
    let update_obj = update.as_object().ok_or_else(|| {
        Error::new(ErrorKind::InvalidQuery, "Update document must be an object")
    })?;
    let operator_mode = update_obj.keys().any(|key| key.starts_with('$'));

    let mut matched = 0;
    let mut next = Vec::with_capacity(docs.len());

    for doc in docs {
        if !executor::matches(doc.as_ref(), query) {
            next.push(doc.clone());
            continue;
        }
        matched += 1;

        let mut updated = doc.as_ref().clone();
        if operator_mode {
            apply_operators(&mut updated, update_obj)?;
        } else {
            replace(&mut updated, update_obj);
        }
        next.push(Arc::new(updated));
    }

    Ok((next, matched))
}

fn apply_operators(doc: &mut Value, update: &Map<String, Value>) -> Result<()> {
    for (op, arg) in update {
        if !op.starts_with('$') {
            return Err(Error::new(
                ErrorKind::InvalidQuery,
                "Cannot mix update operators with replacement fields",
            ));
        }
        let fields = arg.as_object().ok_or_else(|| {
            Error::new(ErrorKind::InvalidQuery, format!("{} expects an object", op))
        })?;

        for (field_path, value) in fields {
            // The primary key never changes under an update.
            if field_path == "_id" || field_path.starts_with("_id.") {
                continue;
            }
            match op.as_str() {
                "$set" => path::set(doc, field_path, value.clone()),
                "$unset" => path::unset(doc, field_path),
                "$inc" => increment(doc, field_path, value)?,
                other => {
                    return Err(Error::new(
                        ErrorKind::InvalidQuery,
                        format!("Unknown update operator: {}", other),
                    ))
                }
            }
        }
    }
    Ok(())
}

/// Numeric add. Integer arithmetic is preserved when both sides are integers;
/// otherwise the result is a float. Incrementing a missing field creates it.
fn increment(doc: &mut Value, field_path: &str, amount: &Value) -> Result<()> {
    let amount_f64 = amount.as_f64().ok_or_else(|| {
        Error::new(ErrorKind::InvalidQuery, "$inc requires a numeric argument")
    })?;

    let next = match path::lookup(doc, field_path) {
        None => amount.clone(),
        Some(Value::Number(current)) => {
            if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
                match a.checked_add(b) {
                    Some(sum) => Value::from(sum),
                    None => float_value(a as f64 + b as f64)?,
                }
            } else {
                let base = current.as_f64().unwrap_or(0.0);
                float_value(base + amount_f64)?
            }
        }
        Some(_) => {
            return Err(Error::new(
                ErrorKind::InvalidQuery,
                format!("Cannot apply $inc to non-numeric field '{}'", field_path),
            ))
        }
    };

    path::set(doc, field_path, next);
    Ok(())
}

fn float_value(value: f64) -> Result<Value> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| Error::new(ErrorKind::InvalidQuery, "$inc produced a non-finite number"))
}

fn replace(doc: &mut Value, replacement: &Map<String, Value>) {
    let id = doc.get("_id").cloned();
    let mut next = Map::new();
    if let Some(id) = id {
        next.insert("_id".to_string(), id);
    }
    for (key, value) in replacement {
        if key != "_id" {
            next.insert(key.clone(), value.clone());
        }
    }
    *doc = Value::Object(next);
}
