// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP surface integration tests: boot the real router against an
//! ephemeral `TcpListener` and drive it with `reqwest`.
//!
//! Run with: `cargo test`

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;

use nearhome_stream_gateway::api::{build_router, AppState};
use nearhome_stream_gateway::config::Config;
use nearhome_stream_gateway::metrics::Metrics;
use nearhome_stream_gateway::registry::Registry;
use nearhome_stream_gateway::session::SessionManager;
use nearhome_stream_gateway::token::{self, TokenPayload};

struct TestServer {
    base_url: String,
    storage_dir: TempDir,
    token_secret: String,
}

async fn spawn_server() -> TestServer {
    let storage_dir = tempfile::tempdir().expect("create tempdir");
    let token_secret = "test-secret".to_string();

    let config = Config {
        storage_dir: storage_dir.path().to_path_buf(),
        token_secret: token_secret.clone(),
        ..Config::default()
    };

    let state = Arc::new(AppState {
        registry: Arc::new(Registry::new()),
        sessions: Arc::new(SessionManager::new()),
        metrics: Arc::new(Metrics::new()),
        config,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        storage_dir,
        token_secret,
    }
}

fn issue_token(secret: &str, tenant_id: &str, camera_id: &str, sid: &str, ttl_secs: i64) -> String {
    let now = Utc::now().timestamp();
    token::sign(
        &TokenPayload {
            sub: "user-1".to_string(),
            tid: tenant_id.to_string(),
            cid: camera_id.to_string(),
            sid: sid.to_string(),
            exp: now + ttl_secs,
            iat: now,
            v: 1,
        },
        secret,
    )
}

async fn provision(server: &TestServer, client: &reqwest::Client, tenant_id: &str, camera_id: &str) -> Value {
    client
        .post(format!("{}/provision", server.base_url))
        .json(&json!({
            "tenantId": tenant_id,
            "cameraId": camera_id,
            "rtspUrl": "rtsp://demo/stream",
        }))
        .send()
        .await
        .expect("provision request")
        .json()
        .await
        .expect("provision body")
}

#[tokio::test]
async fn provision_then_health_round_trips() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let body = provision(&server, &client, "tenant-a", "camera-a").await;
    assert_eq!(body["data"]["status"], "ready");
    assert_eq!(body["data"]["version"], 1);
    assert_eq!(body["data"]["tenantId"], "tenant-a");

    let health = client
        .get(format!("{}/health/tenant-a/camera-a", server.base_url))
        .send()
        .await
        .expect("health request");
    assert_eq!(health.status(), 200);
    let health_body: Value = health.json().await.expect("health body");
    assert_eq!(health_body["ok"], true);
    assert_eq!(health_body["data"]["status"], "ready");
}

#[tokio::test]
async fn provision_is_idempotent_and_version_bumps_on_change() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let first = provision(&server, &client, "tenant-b", "camera-b").await;
    assert_eq!(first["data"]["version"], 1);
    assert_eq!(first["data"]["reprovisioned"], true);

    let second = provision(&server, &client, "tenant-b", "camera-b").await;
    assert_eq!(second["data"]["version"], 1);
    assert_eq!(second["data"]["reprovisioned"], false);

    let changed = client
        .post(format!("{}/provision", server.base_url))
        .json(&json!({
            "tenantId": "tenant-b",
            "cameraId": "camera-b",
            "rtspUrl": "rtsp://demo/other-stream",
        }))
        .send()
        .await
        .expect("reprovision request")
        .json::<Value>()
        .await
        .expect("reprovision body");
    assert_eq!(changed["data"]["version"], 2);
    assert_eq!(changed["data"]["reprovisioned"], true);
}

#[tokio::test]
async fn provision_rejects_missing_fields_with_validation_error() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/provision", server.base_url))
        .json(&json!({ "tenantId": "tenant-c" }))
        .send()
        .await
        .expect("provision request");
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.expect("body");
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["details"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn playback_requires_a_token() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    provision(&server, &client, "tenant-d", "camera-d").await;

    let response = client
        .get(format!("{}/playback/tenant-d/camera-d/index.m3u8", server.base_url))
        .send()
        .await
        .expect("playback request");
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.expect("body");
    assert_eq!(body["code"], "PLAYBACK_TOKEN_MISSING");
}

#[tokio::test]
async fn playback_rejects_scope_mismatch_before_stream_state() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    provision(&server, &client, "tenant-e", "camera-e").await;

    let token = issue_token(&server.token_secret, "tenant-wrong", "camera-e", "sid-1", 3600);
    let response = client
        .get(format!(
            "{}/playback/tenant-e/camera-e/index.m3u8?token={token}",
            server.base_url
        ))
        .send()
        .await
        .expect("playback request");
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.expect("body");
    assert_eq!(body["code"], "PLAYBACK_TOKEN_SCOPE_MISMATCH");
}

#[tokio::test]
async fn playback_manifest_rewrites_segment_reference_and_creates_session() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    provision(&server, &client, "tenant-f", "camera-f").await;

    let token = issue_token(&server.token_secret, "tenant-f", "camera-f", "sid-f1", 3600);
    let response = client
        .get(format!(
            "{}/playback/tenant-f/camera-f/index.m3u8?token={token}",
            server.base_url
        ))
        .send()
        .await
        .expect("playback request");
    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("manifest body");
    assert!(body.contains("/playback/tenant-f/camera-f/segment0.ts?token="));
    assert!(!body.contains("\nsegment0.ts\n"));

    let sessions = client
        .get(format!("{}/sessions?tenantId=tenant-f&cameraId=camera-f", server.base_url))
        .send()
        .await
        .expect("sessions request")
        .json::<Value>()
        .await
        .expect("sessions body");
    let list = sessions["data"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["sid"], "sid-f1");
    assert_eq!(list[0]["status"], "active");
}

#[tokio::test]
async fn playback_segment_served_with_video_content_type() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    provision(&server, &client, "tenant-g", "camera-g").await;

    let token = issue_token(&server.token_secret, "tenant-g", "camera-g", "sid-g1", 3600);
    let response = client
        .get(format!(
            "{}/playback/tenant-g/camera-g/segment0.ts?token={token}",
            server.base_url
        ))
        .send()
        .await
        .expect("segment request");
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("content-type").unwrap(), "video/MP2T");
}

#[tokio::test]
async fn playback_against_unprovisioned_stream_is_not_found() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let token = issue_token(&server.token_secret, "tenant-h", "camera-h", "sid-h1", 3600);
    let response = client
        .get(format!(
            "{}/playback/tenant-h/camera-h/index.m3u8?token={token}",
            server.base_url
        ))
        .send()
        .await
        .expect("playback request");
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("body");
    assert_eq!(body["code"], "PLAYBACK_STREAM_NOT_FOUND");
}

#[tokio::test]
async fn deprovision_stops_stream_and_closes_sessions() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    provision(&server, &client, "tenant-i", "camera-i").await;

    let token = issue_token(&server.token_secret, "tenant-i", "camera-i", "sid-i1", 3600);
    client
        .get(format!(
            "{}/playback/tenant-i/camera-i/index.m3u8?token={token}",
            server.base_url
        ))
        .send()
        .await
        .expect("playback request");

    let deprovision = client
        .post(format!("{}/deprovision", server.base_url))
        .json(&json!({ "tenantId": "tenant-i", "cameraId": "camera-i" }))
        .send()
        .await
        .expect("deprovision request")
        .json::<Value>()
        .await
        .expect("deprovision body");
    assert_eq!(deprovision["data"]["removed"], true);

    let health = client
        .get(format!("{}/health/tenant-i/camera-i", server.base_url))
        .send()
        .await
        .expect("health request")
        .json::<Value>()
        .await
        .expect("health body");
    assert_eq!(health["data"]["status"], "stopped");

    let playback_after = client
        .get(format!(
            "{}/playback/tenant-i/camera-i/index.m3u8?token={token}",
            server.base_url
        ))
        .send()
        .await
        .expect("playback request after deprovision");
    assert_eq!(playback_after.status(), 410);
}

#[tokio::test]
async fn sessions_sweep_endpoint_reports_counts() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/sessions/sweep", server.base_url))
        .send()
        .await
        .expect("sweep request");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("sweep body");
    assert_eq!(body["data"]["expired"], 0);
    assert_eq!(body["data"]["ended"], 0);
}

#[tokio::test]
async fn sessions_list_rejects_unknown_status_filter() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/sessions?status=bogus", server.base_url))
        .send()
        .await
        .expect("sessions request");
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn metrics_endpoint_exposes_prometheus_text() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    provision(&server, &client, "tenant-j", "camera-j").await;

    let response = client
        .get(format!("{}/metrics", server.base_url))
        .send()
        .await
        .expect("metrics request");
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain; version=0.0.4; charset=utf-8"
    );
    let body = response.text().await.expect("metrics body");
    assert!(body.contains("nearhome_streams_total{status=\"ready\"} 1"));
    assert!(body.contains("# TYPE nearhome_stream_session_sweeps_total counter"));
}

#[tokio::test]
async fn unknown_route_returns_not_found_envelope() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/no-such-route", server.base_url))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("body");
    assert_eq!(body["code"], "NOT_FOUND");

    drop(server.storage_dir);
}
