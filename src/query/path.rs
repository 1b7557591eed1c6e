use serde_json::{Map, Value};

/// Resolves a dot-separated field path left-to-right.
/// Absence (or a non-object) at any level yields `None`.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Sets the value at a dot-separated path, creating intermediate objects.
/// An intermediate that exists but is not an object is replaced by one.
pub fn set(doc: &mut Value, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            if let Some(obj) = doc.as_object_mut() {
                obj.insert(path.to_string(), value);
            }
        }
        Some((head, rest)) => {
            if let Some(obj) = doc.as_object_mut() {
                let child = obj
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !child.is_object() {
                    *child = Value::Object(Map::new());
                }
                set(child, rest, value);
            }
        }
    }
}

/// Removes the value at a dot-separated path. Missing paths are a no-op.
pub fn unset(doc: &mut Value, path: &str) {
    match path.split_once('.') {
        None => {
            if let Some(obj) = doc.as_object_mut() {
                obj.remove(path);
            }
        }
        Some((head, rest)) => {
            if let Some(child) = doc.as_object_mut().and_then(|obj| obj.get_mut(head)) {
                unset(child, rest);
            }
        }
    }
}
