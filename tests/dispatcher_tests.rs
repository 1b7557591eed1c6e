use serde_json::{json, Value};
use tempfile::tempdir;

use aevumdb::core::config::Config;
use aevumdb::server::dispatcher;
use aevumdb::store::controller::Store;

fn open(dir: &tempfile::TempDir) -> Store {
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    Store::open(&config).expect("store must open")
}

fn send(store: &Store, request: Value) -> Value {
    let raw = dispatcher::process(store, &request.to_string());
    serde_json::from_str(&raw).expect("responses are always valid JSON")
}

#[test]
fn empty_and_malformed_payloads() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let raw = dispatcher::process(&store, "");
    assert_eq!(
        raw,
        r#"{"status":"error","message":"Empty request payload"}"#
    );

    let raw = dispatcher::process(&store, "{not json");
    assert_eq!(raw, r#"{"status":"error","message":"Invalid JSON syntax"}"#);
}

#[test]
fn authentication_is_checked_before_anything_else() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let resp = send(
        &store,
        json!({"auth": "wrong", "action": "find", "collection": "users"}),
    );
    assert_eq!(resp["status"], json!("error"));
    assert_eq!(
        resp["message"],
        json!("Unauthorized: Invalid or missing API Key")
    );

    let resp = send(&store, json!({"action": "find", "collection": "users"}));
    assert_eq!(
        resp["message"],
        json!("Unauthorized: Invalid or missing API Key")
    );
}

#[test]
fn unknown_actions_are_reported_by_name() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let resp = send(&store, json!({"auth": "root", "action": "explode"}));
    assert_eq!(resp["status"], json!("error"));
    assert_eq!(resp["message"], json!("Unknown action opcode: explode"));
}

#[test]
fn insert_then_find_round_trips() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let resp = send(
        &store,
        json!({
            "auth": "root", "action": "insert", "collection": "users",
            "data": {"user_id": "u-123", "plan": "premium", "credits": 100}
        }),
    );
    assert_eq!(
        resp,
        json!({"status": "ok", "message": "Document inserted"})
    );

    let resp = send(
        &store,
        json!({
            "auth": "root", "action": "find", "collection": "users",
            "query": {"plan": "premium"}
        }),
    );
    assert_eq!(resp["status"], json!("ok"));
    let data = resp["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["user_id"], json!("u-123"));
    assert_eq!(data[0]["plan"], json!("premium"));
    assert_eq!(data[0]["credits"], json!(100));
    assert!(data[0]["_id"].is_string());
}

#[test]
fn update_commits_and_is_visible() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    send(
        &store,
        json!({
            "auth": "root", "action": "insert", "collection": "users",
            "data": {"user_id": "u-123", "credits": 100}
        }),
    );
    let resp = send(
        &store,
        json!({
            "auth": "root", "action": "update", "collection": "users",
            "query": {"user_id": "u-123"}, "update": {"$set": {"credits": 90}}
        }),
    );
    assert_eq!(resp, json!({"status": "ok", "message": "Update committed"}));

    let resp = send(
        &store,
        json!({
            "auth": "root", "action": "find", "collection": "users",
            "query": {"user_id": "u-123"}
        }),
    );
    assert_eq!(resp["data"][0]["credits"], json!(90));
}

#[test]
fn count_reports_matches() {
    let dir = tempdir().unwrap();
    let store = open(&dir);
    for i in 0..4 {
        send(
            &store,
            json!({
                "auth": "root", "action": "insert", "collection": "users",
                "data": {"n": i, "plan": if i % 2 == 0 { "free" } else { "premium" }}
            }),
        );
    }

    let resp = send(
        &store,
        json!({"auth": "root", "action": "count", "collection": "users", "query": {}}),
    );
    assert_eq!(resp, json!({"status": "ok", "count": 4}));

    let resp = send(
        &store,
        json!({
            "auth": "root", "action": "count", "collection": "users",
            "query": {"plan": "free"}
        }),
    );
    assert_eq!(resp["count"], json!(2));
}

#[test]
fn secondary_index_backs_find_after_create_index() {
    let dir = tempdir().unwrap();
    let store = open(&dir);
    for (id, plan) in [("u-1", "free"), ("u-2", "premium"), ("u-3", "free")] {
        send(
            &store,
            json!({
                "auth": "root", "action": "insert", "collection": "users",
                "data": {"_id": id, "plan": plan}
            }),
        );
    }

    let resp = send(
        &store,
        json!({"auth": "root", "action": "create_index", "collection": "users", "field": "plan"}),
    );
    assert_eq!(
        resp,
        json!({"status": "ok", "message": "Index created and backfilled"})
    );

    let resp = send(
        &store,
        json!({
            "auth": "root", "action": "find", "collection": "users",
            "query": {"plan": "free"}
        }),
    );
    let data = resp["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert!(data.iter().all(|doc| doc["plan"] == json!("free")));
}

#[test]
fn rbac_blocks_writes_for_read_only_principals() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let resp = send(
        &store,
        json!({"auth": "root", "action": "create_user", "key": "reader", "role": "read_only"}),
    );
    assert_eq!(
        resp,
        json!({"status": "ok", "message": "User created successfully"})
    );

    let resp = send(
        &store,
        json!({
            "auth": "reader", "action": "insert", "collection": "users",
            "data": {"x": 1}
        }),
    );
    assert_eq!(
        resp,
        json!({"status": "error", "message": "Forbidden: Insufficient RBAC privileges"})
    );

    // Reads are allowed.
    let resp = send(
        &store,
        json!({"auth": "reader", "action": "count", "collection": "users", "query": {}}),
    );
    assert_eq!(resp["status"], json!("ok"));

    // Admin-only maintenance is not.
    let resp = send(
        &store,
        json!({"auth": "reader", "action": "compact", "collection": "users"}),
    );
    assert_eq!(
        resp["message"],
        json!("Forbidden: Insufficient RBAC privileges")
    );
}

#[test]
fn schema_enforcement_over_the_wire() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let resp = send(
        &store,
        json!({
            "auth": "root", "action": "set_schema", "collection": "users",
            "schema": {
                "type": "object",
                "properties": {"user_id": {"type": "string"}},
                "required": ["user_id"]
            }
        }),
    );
    assert_eq!(resp, json!({"status": "ok", "message": "Schema applied"}));

    let resp = send(
        &store,
        json!({
            "auth": "root", "action": "insert", "collection": "users",
            "data": {"plan": "x"}
        }),
    );
    assert_eq!(resp["status"], json!("error"));

    let resp = send(
        &store,
        json!({
            "auth": "root", "action": "insert", "collection": "users",
            "data": {"user_id": "u-9", "plan": "x"}
        }),
    );
    assert_eq!(resp["status"], json!("ok"));
}

#[test]
fn delete_and_compact_round_trip() {
    let dir = tempdir().unwrap();
    let store = open(&dir);
    for i in 0..3 {
        send(
            &store,
            json!({
                "auth": "root", "action": "insert", "collection": "users",
                "data": {"_id": format!("u-{}", i)}
            }),
        );
    }

    let resp = send(
        &store,
        json!({
            "auth": "root", "action": "delete", "collection": "users",
            "query": {"_id": "u-1"}
        }),
    );
    assert_eq!(resp, json!({"status": "ok", "message": "Documents deleted"}));

    let resp = send(
        &store,
        json!({"auth": "root", "action": "compact", "collection": "users"}),
    );
    assert_eq!(resp, json!({"status": "ok", "message": "Compaction completed"}));

    let resp = send(
        &store,
        json!({"auth": "root", "action": "count", "collection": "users", "query": {}}),
    );
    assert_eq!(resp["count"], json!(2));
}

#[test]
fn missing_mandatory_fields_are_named() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let cases = [
        (json!({"auth": "root", "action": "insert", "collection": "c"}), "Missing payload: 'data'"),
        (json!({"auth": "root", "action": "update", "collection": "c"}), "Missing arguments: 'query' or 'update'"),
        (json!({"auth": "root", "action": "upsert", "collection": "c"}), "Missing arguments: 'query' or 'data'"),
        (json!({"auth": "root", "action": "delete", "collection": "c"}), "Missing argument: 'query'"),
        (json!({"auth": "root", "action": "set_schema", "collection": "c"}), "Missing argument: 'schema'"),
        (json!({"auth": "root", "action": "create_index", "collection": "c"}), "Missing argument: 'field'"),
        (json!({"auth": "root", "action": "create_user"}), "Missing required arguments: 'key' or 'role'"),
    ];
    for (request, message) in cases {
        let resp = send(&store, request);
        assert_eq!(resp["status"], json!("error"));
        assert_eq!(resp["message"], json!(message));
    }
}

#[test]
fn exit_says_goodbye() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let resp = send(&store, json!({"auth": "root", "action": "exit"}));
    assert_eq!(
        resp,
        json!({"status": "goodbye", "message": "Closing connection"})
    );
}
