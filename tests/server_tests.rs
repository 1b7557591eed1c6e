use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::tempdir;

use aevumdb::core::config::Config;
use aevumdb::server::server::Server;
use aevumdb::store::controller::Store;

fn request(stream: &mut TcpStream, body: Value) -> Value {
    stream.write_all(body.to_string().as_bytes()).unwrap();
    let mut buffer = [0u8; 8192];
    let read = stream.read(&mut buffer).unwrap();
    serde_json::from_slice(&buffer[..read]).expect("one JSON response per request")
}

#[test]
fn sessions_run_end_to_end_over_tcp() {
    let dir = tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let store = Arc::new(Store::open(&config).unwrap());

    // Port 0 lets the OS pick a free port.
    let server = Arc::new(Server::bind(store, 0, 2).unwrap());
    let addr = server.local_addr().unwrap();
    let runner = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.run())
    };

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let resp = request(
        &mut stream,
        json!({
            "auth": "root", "action": "insert", "collection": "users",
            "data": {"user_id": "u-123", "plan": "premium"}
        }),
    );
    assert_eq!(resp, json!({"status": "ok", "message": "Document inserted"}));

    let resp = request(
        &mut stream,
        json!({
            "auth": "root", "action": "find", "collection": "users",
            "query": {"plan": "premium"}
        }),
    );
    assert_eq!(resp["status"], json!("ok"));
    assert_eq!(resp["data"][0]["user_id"], json!("u-123"));

    // A second concurrent session sees the same state.
    let mut second = TcpStream::connect(addr).unwrap();
    second
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let resp = request(
        &mut second,
        json!({"auth": "root", "action": "count", "collection": "users", "query": {}}),
    );
    assert_eq!(resp["count"], json!(1));

    let resp = request(&mut second, json!({"auth": "root", "action": "exit"}));
    assert_eq!(resp["status"], json!("goodbye"));

    let resp = request(&mut stream, json!({"auth": "root", "action": "exit"}));
    assert_eq!(resp["status"], json!("goodbye"));

    server.stop();
    runner.join().unwrap();
}
