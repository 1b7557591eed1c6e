use serde_json::{json, Value};

use crate::core::error::{Error, ErrorKind, Result};
use crate::store::auth::{self, Role};
use crate::store::controller::Store;

/// Processes one raw request and produces one serialized JSON response.
///
/// The pipeline is strict: parse, authenticate, authorize, dispatch,
/// serialize. The dispatcher itself is stateless; every effect lives in the
/// store.
pub fn process(store: &Store, raw: &str) -> String {
    if raw.trim().is_empty() {
        return error_response("Empty request payload");
    }

    let request: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return error_response("Invalid JSON syntax"),
    };

    let action = request
        .get("action")
        .and_then(|a| a.as_str())
        .unwrap_or("")
        .to_string();
    let api_key = request.get("auth").and_then(|a| a.as_str()).unwrap_or("");

    let role = store.authenticate(api_key);
    if role == Role::None {
        return error_response("Unauthorized: Invalid or missing API Key");
    }
    if !auth::has_permission(role, &action) {
        return error_response("Forbidden: Insufficient RBAC privileges");
    }

    if action == "exit" {
        return json!({"status": "goodbye", "message": "Closing connection"}).to_string();
    }

    let collection = request
        .get("collection")
        .and_then(|c| c.as_str())
        .unwrap_or("");

    match dispatch(store, &request, &action, collection) {
        Ok(response) => response.to_string(),
        Err(e) => error_response(&e.context),
    }
}

fn dispatch(store: &Store, request: &Value, action: &str, collection: &str) -> Result<Value> {
    match action {
        "insert" => {
            let data = request
                .get("data")
                .cloned()
                .ok_or_else(|| missing("Missing payload: 'data'"))?;
            store.insert(collection, data)?;
            Ok(ok_message("Document inserted"))
        }
        "upsert" => {
            let query = request.get("query");
            let data = request.get("data");
            match (query, data) {
                (Some(query), Some(data)) => {
                    store.upsert(collection, query, data.clone())?;
                    Ok(ok_message("Document upserted"))
                }
                _ => Err(missing("Missing arguments: 'query' or 'data'")),
            }
        }
        "find" => {
            let query = request.get("query").cloned().unwrap_or(Value::Null);
            let sort = request.get("sort").cloned().unwrap_or(Value::Null);
            let projection = request.get("projection").cloned().unwrap_or(Value::Null);
            let limit = non_negative(request.get("limit"));
            let skip = non_negative(request.get("skip"));

            let data = store.find(collection, &query, &sort, &projection, limit, skip)?;
            Ok(json!({"status": "ok", "data": data}))
        }
        "count" => {
            let query = request.get("query").cloned().unwrap_or(Value::Null);
            let count = store.count(collection, &query)?;
            Ok(json!({"status": "ok", "count": count}))
        }
        "update" => {
            let query = request.get("query");
            let update_doc = request.get("update");
            match (query, update_doc) {
                (Some(query), Some(update_doc)) => {
                    store.update(collection, query, update_doc)?;
                    Ok(ok_message("Update committed"))
                }
                _ => Err(missing("Missing arguments: 'query' or 'update'")),
            }
        }
        "delete" => {
            let query = request
                .get("query")
                .ok_or_else(|| missing("Missing argument: 'query'"))?;
            store.delete(collection, query)?;
            Ok(ok_message("Documents deleted"))
        }
        "set_schema" => {
            let schema = request
                .get("schema")
                .ok_or_else(|| missing("Missing argument: 'schema'"))?;
            store.set_schema(collection, schema)?;
            Ok(ok_message("Schema applied"))
        }
        "create_index" => {
            let field = request
                .get("field")
                .and_then(|f| f.as_str())
                .ok_or_else(|| missing("Missing argument: 'field'"))?;
            store.create_index(collection, field)?;
            Ok(ok_message("Index created and backfilled"))
        }
        "create_user" => {
            let key = request.get("key").and_then(|k| k.as_str());
            let role = request.get("role").and_then(|r| r.as_str());
            match (key, role) {
                (Some(key), Some(role)) => {
                    store.create_user(key, role)?;
                    Ok(ok_message("User created successfully"))
                }
                _ => Err(missing("Missing required arguments: 'key' or 'role'")),
            }
        }
        "compact" => {
            store.trigger_compaction(collection)?;
            Ok(ok_message("Compaction completed"))
        }
        other => Err(Error::new(
            ErrorKind::Protocol,
            format!("Unknown action opcode: {}", other),
        )),
    }
}

fn non_negative(value: Option<&Value>) -> usize {
    value
        .and_then(|v| v.as_i64())
        .map_or(0, |n| n.max(0) as usize)
}

fn missing(message: &str) -> Error {
    Error::new(ErrorKind::Protocol, message)
}

fn ok_message(message: &str) -> Value {
    json!({"status": "ok", "message": message})
}

fn error_response(message: &str) -> String {
    json!({"status": "error", "message": message}).to_string()
}
