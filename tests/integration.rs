//! HTTP API tests against the coordinator router

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use minidfs::common::{sha256_hex, timestamp_now, Config};
use minidfs::coordinator::metadata::MetadataStore;
use minidfs::coordinator::node_client::InMemoryNodes;
use minidfs::Coordinator;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const DATA: &[u8] = b"hello distributed world";

fn coordinator() -> Coordinator {
    let store = Arc::new(MetadataStore::in_memory());
    Coordinator::with_parts(Config::default(), store, Arc::new(InMemoryNodes::new())).unwrap()
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(app: &Router, node_id: &str, space: u64) {
    let (status, body) = call(
        app,
        "POST",
        "/api/nodes/register",
        Some(json!({
            "node_id": node_id,
            "node_address": format!("http://{}:8001", node_id),
            "available_space": space,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}

/// Request an upload and confirm it from every assigned node
async fn upload(app: &Router) -> String {
    let (status, plan) = call(
        app,
        "POST",
        "/api/upload/request",
        Some(json!({ "filename": "hello.txt", "file_size": DATA.len() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let file_id = plan["file_id"].as_str().unwrap().to_string();

    for target in plan["upload_nodes"].as_array().unwrap() {
        let (status, body) = call(
            app,
            "POST",
            "/api/upload/confirm",
            Some(json!({
                "file_id": file_id,
                "node_id": target["node_id"],
                "checksum": sha256_hex(DATA),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], true);
    }
    file_id
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = coordinator().router();
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["persistent"], false);
}

#[tokio::test]
async fn test_register_and_heartbeat() {
    let app = coordinator().router();
    register(&app, "node-1", 1000).await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/nodes/heartbeat",
        Some(json!({ "node_id": "node-1", "available_space": 800, "file_count": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node_status"], "active");

    let (_, nodes) = call(&app, "GET", "/api/nodes", None).await;
    assert_eq!(nodes["total"], 1);
    assert_eq!(nodes["nodes"][0]["available_bytes"], 800);
    assert_eq!(nodes["nodes"][0]["file_count"], 3);
}

#[tokio::test]
async fn test_heartbeat_from_unknown_node_needs_address() {
    let app = coordinator().router();
    let (status, body) = call(
        &app,
        "POST",
        "/api/nodes/heartbeat",
        Some(json!({ "node_id": "ghost" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ghost"));

    let (status, body) = call(
        &app,
        "POST",
        "/api/nodes/heartbeat",
        Some(json!({ "node_id": "ghost", "node_address": "http://ghost:8001" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node_status"], "active");
}

#[tokio::test]
async fn test_upload_then_download() {
    let app = coordinator().router();
    register(&app, "node-1", 1000).await;
    register(&app, "node-2", 2000).await;

    let file_id = upload(&app).await;

    let (status, plan) = call(&app, "GET", &format!("/api/download/{}", file_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plan["filename"], "hello.txt");
    assert_eq!(plan["checksum"], sha256_hex(DATA));
    let targets = plan["download_nodes"].as_array().unwrap();
    assert_eq!(targets.len(), 2);
    let mut hosts: Vec<&str> = targets
        .iter()
        .map(|t| t["node_id"].as_str().unwrap())
        .collect();
    hosts.sort();
    assert_eq!(hosts, vec!["node-1", "node-2"]);
    assert!(targets[0]["download_url"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/download/{}", file_id)));

    let (status, detail) = call(&app, "GET", &format!("/api/files/{}", file_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["active_replicas"], 2);
    assert_eq!(detail["replication_factor"], 2);

    let (_, listing) = call(&app, "GET", "/api/files?limit=10", None).await;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["limit"], 10);
}

#[tokio::test]
async fn test_upload_needs_enough_nodes() {
    let app = coordinator().router();
    register(&app, "node-1", 1000).await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/upload/request",
        Some(json!({ "filename": "big.iso", "file_size": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("Insufficient"));
}

#[tokio::test]
async fn test_confirm_with_conflicting_checksum() {
    let app = coordinator().router();
    register(&app, "node-1", 1000).await;
    register(&app, "node-2", 1000).await;

    let (_, plan) = call(
        &app,
        "POST",
        "/api/upload/request",
        Some(json!({ "filename": "a.txt", "file_size": 4 })),
    )
    .await;
    let file_id = plan["file_id"].as_str().unwrap();

    let (status, _) = call(
        &app,
        "POST",
        "/api/upload/confirm",
        Some(json!({ "file_id": file_id, "node_id": "node-1", "checksum": sha256_hex(b"aaaa") })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &app,
        "POST",
        "/api/upload/confirm",
        Some(json!({ "file_id": file_id, "node_id": "node-2", "checksum": sha256_hex(b"bbbb") })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        "POST",
        "/api/upload/confirm",
        Some(json!({ "file_id": file_id, "node_id": "node-2", "checksum": "not-a-digest" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_unavailable_when_hosts_lost() {
    let coord = coordinator();
    let app = coord.router();
    register(&app, "node-1", 1000).await;
    register(&app, "node-2", 1000).await;
    let file_id = upload(&app).await;

    let lost = coord.monitor().sweep(timestamp_now() + 3600).unwrap();
    assert_eq!(lost.len(), 2);

    let (status, body) = call(&app, "GET", &format!("/api/download/{}", file_id), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains(&file_id));

    let (_, stats) = call(&app, "GET", "/api/stats", None).await;
    assert_eq!(stats["total_files"], 1);
    assert_eq!(stats["active_nodes"], 0);
    assert_eq!(stats["inactive_nodes"], 2);
    assert_eq!(stats["unavailable_files"], 1);
}

#[tokio::test]
async fn test_unknown_file_is_not_found() {
    let app = coordinator().router();
    let (status, _) = call(&app, "GET", "/api/download/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "GET", "/api/files/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "POST", "/api/recovery/force/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_force_recovery_queues_critical_task() {
    let app = coordinator().router();
    register(&app, "node-1", 1000).await;
    register(&app, "node-2", 1000).await;
    let file_id = upload(&app).await;

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/recovery/force/{}", file_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["priority"], 20);

    let (_, queue) = call(&app, "GET", "/api/recovery/queue", None).await;
    assert_eq!(queue["total"], 1);
    assert_eq!(queue["summary"]["critical"], 1);
    assert_eq!(queue["queue"][0]["file_id"], file_id.as_str());
    assert_eq!(queue["queue"][0]["forced"], true);

    let (_, stats) = call(&app, "GET", "/api/stats", None).await;
    assert_eq!(stats["recovery_queue_length"], 1);
}

#[tokio::test]
async fn test_recovery_history_and_stats_start_empty() {
    let app = coordinator().router();
    let (status, history) = call(&app, "GET", "/api/recovery/history?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total"], 0);

    let (status, stats) = call(&app, "GET", "/api/recovery/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_recoveries"], 0);
    assert_eq!(stats["queue_length"], 0);
}

#[tokio::test]
async fn test_maintenance_triggers_report() {
    let app = coordinator().router();
    let (status, body) = call(&app, "POST", "/api/replication/force", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["files_checked"], 0);

    let (status, body) = call(&app, "POST", "/api/replication/verify", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["checked"], 0);
}
