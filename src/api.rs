// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP Surface — the boundary exposing provision/deprovision, playback,
//! health, sessions, and metrics (SPEC_FULL.md §4.6).
//!
//! Built the same way the donor's `build_router` is: one `Router::new()`
//! with one `.route(...)` per endpoint, a `CorsLayer::permissive()` layer,
//! and a shared `Arc<AppState>` injected via `.with_state(state)`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::assets::{self, AssetKind, RetryPolicy};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::metrics::Metrics;
use crate::registry::{Registry, StreamKey};
use crate::session::SessionManager;
use crate::token::{self, TokenPayload};
use crate::types::{CodecHint, Connectivity, SessionStatus, SourceConfig, StreamStatus, Transport};

/// Shared state injected into every handler and both background loops.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub sessions: Arc<SessionManager>,
    pub metrics: Arc<Metrics>,
    pub config: Config,
}

/// Build the axum router for the gateway.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/provision", post(handle_provision))
        .route("/deprovision", post(handle_deprovision))
        .route("/health", get(handle_health))
        .route("/health/{tenant_id}/{camera_id}", get(handle_health_one))
        .route("/metrics", get(handle_metrics))
        .route(
            "/playback/{tenant_id}/{camera_id}/index.m3u8",
            get(handle_playback_manifest),
        )
        .route(
            "/playback/{tenant_id}/{camera_id}/segment0.ts",
            get(handle_playback_segment),
        )
        .route("/sessions", get(handle_sessions_list))
        .route("/sessions/sweep", post(handle_sessions_sweep))
        .fallback(handle_not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server and serve until the listener is dropped.
pub async fn start_server(state: Arc<AppState>, port: u16) {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    info!(port, "Stream gateway listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
    }
}

async fn handle_not_found() -> Response {
    GatewayError::NotFound.into_response()
}

// ──────────────── validation helpers ──────────────────────────────────────

#[derive(Debug, Serialize)]
struct FieldError {
    field: &'static str,
    message: String,
}

fn validation_error(errors: Vec<FieldError>) -> GatewayError {
    GatewayError::Validation {
        details: json!(errors),
    }
}

fn malformed_body(err: serde_json::Error) -> GatewayError {
    validation_error(vec![FieldError {
        field: "body",
        message: err.to_string(),
    }])
}

// ──────────────── POST /provision ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionBody {
    tenant_id: Option<String>,
    camera_id: Option<String>,
    rtsp_url: Option<String>,
    #[serde(default)]
    transport: Transport,
    #[serde(default)]
    codec_hint: CodecHint,
    target_profiles: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionResponseData {
    #[serde(flatten)]
    entry: crate::types::StreamEntry,
    playback_path: String,
    reprovisioned: bool,
}

async fn handle_provision(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    let parsed: ProvisionBody = serde_json::from_slice(&body).map_err(malformed_body)?;

    let mut errors = Vec::new();
    let tenant_id = match parsed.tenant_id.filter(|s| !s.is_empty()) {
        Some(t) => t,
        None => {
            errors.push(FieldError {
                field: "tenantId",
                message: "must be a non-empty string".to_string(),
            });
            String::new()
        }
    };
    let camera_id = match parsed.camera_id.filter(|s| !s.is_empty()) {
        Some(c) => c,
        None => {
            errors.push(FieldError {
                field: "cameraId",
                message: "must be a non-empty string".to_string(),
            });
            String::new()
        }
    };
    let rtsp_url = match parsed.rtsp_url {
        Some(u) if u.len() >= 4 => u,
        Some(_) => {
            errors.push(FieldError {
                field: "rtspUrl",
                message: "must be at least 4 characters".to_string(),
            });
            String::new()
        }
        None => {
            errors.push(FieldError {
                field: "rtspUrl",
                message: "is required".to_string(),
            });
            String::new()
        }
    };
    if !errors.is_empty() {
        return Err(validation_error(errors));
    }

    let source = SourceConfig {
        transport: parsed.transport,
        codec_hint: parsed.codec_hint,
        target_profiles: parsed.target_profiles.unwrap_or_else(|| vec!["main".to_string()]),
    };

    let key = StreamKey::new(tenant_id.clone(), camera_id.clone());
    let storage_dir = state.config.storage_dir.clone();
    let outcome = state.registry.upsert(key, rtsp_url, source, |entry| {
        assets::produce(&storage_dir, &entry.tenant_id, &entry.camera_id)
    })?;

    info!(
        tenant_id,
        camera_id,
        version = outcome.entry.version,
        reprovisioned = outcome.reprovisioned,
        "Stream provisioned"
    );

    let playback_path = format!("/playback/{tenant_id}/{camera_id}/index.m3u8");
    let data = ProvisionResponseData {
        entry: outcome.entry,
        playback_path,
        reprovisioned: outcome.reprovisioned,
    };
    Ok((StatusCode::OK, Json(json!({ "data": data }))).into_response())
}

// ──────────────── POST /deprovision ───────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeprovisionBody {
    tenant_id: Option<String>,
    camera_id: Option<String>,
}

async fn handle_deprovision(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response> {
    let parsed: DeprovisionBody = serde_json::from_slice(&body).map_err(malformed_body)?;

    let mut errors = Vec::new();
    let tenant_id = parsed.tenant_id.filter(|s| !s.is_empty()).unwrap_or_else(|| {
        errors.push(FieldError {
            field: "tenantId",
            message: "must be a non-empty string".to_string(),
        });
        String::new()
    });
    let camera_id = parsed.camera_id.filter(|s| !s.is_empty()).unwrap_or_else(|| {
        errors.push(FieldError {
            field: "cameraId",
            message: "must be a non-empty string".to_string(),
        });
        String::new()
    });
    if !errors.is_empty() {
        return Err(validation_error(errors));
    }

    let key = StreamKey::new(tenant_id.clone(), camera_id.clone());
    let removed = state.registry.mark_stopped(&key);
    if removed {
        state.sessions.close_for_stream(&tenant_id, &camera_id, "deprovisioned");
        info!(tenant_id, camera_id, "Stream deprovisioned");
    }

    Ok((StatusCode::OK, Json(json!({ "data": { "removed": removed } }))).into_response())
}

// ──────────────── GET /health, /health/:tenant/:camera ────────────────────

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "streams": state.registry.len(),
        "sessions": state.sessions.count_by_status().values().sum::<usize>(),
        "storageDir": state.config.storage_dir.to_string_lossy(),
    }))
}

async fn handle_health_one(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, camera_id)): Path<(String, String)>,
) -> Response {
    let key = StreamKey::new(tenant_id, camera_id);
    match state.registry.get(&key) {
        Some(entry) => (StatusCode::OK, Json(json!({ "ok": true, "data": entry }))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "reason": "not_provisioned" })),
        )
            .into_response(),
    }
}

// ──────────────── GET /metrics ─────────────────────────────────────────────

async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut stream_status_counts = std::collections::HashMap::new();
    let mut connectivity_counts = std::collections::HashMap::new();
    for entry in state.registry.iterate() {
        *stream_status_counts.entry(status_label(entry.status)).or_insert(0u64) += 1;
        *connectivity_counts
            .entry(connectivity_label(entry.health.connectivity))
            .or_insert(0u64) += 1;
    }
    for status in [StreamStatus::Provisioning, StreamStatus::Ready, StreamStatus::Stopped] {
        let label = status_label(status);
        state
            .metrics
            .set_streams_total(label, *stream_status_counts.get(label).unwrap_or(&0));
    }
    for connectivity in [Connectivity::Online, Connectivity::Degraded, Connectivity::Offline] {
        let label = connectivity_label(connectivity);
        state
            .metrics
            .set_stream_connectivity_total(label, *connectivity_counts.get(label).unwrap_or(&0));
    }

    let session_counts = state.sessions.count_by_status();
    for status in [
        SessionStatus::Issued,
        SessionStatus::Active,
        SessionStatus::Ended,
        SessionStatus::Expired,
    ] {
        let label = session_status_label(status);
        state.metrics.set_stream_sessions_total(
            label,
            *session_counts.get(&status).unwrap_or(&0) as u64,
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

fn status_label(status: StreamStatus) -> &'static str {
    match status {
        StreamStatus::Provisioning => "provisioning",
        StreamStatus::Ready => "ready",
        StreamStatus::Stopped => "stopped",
    }
}

fn connectivity_label(connectivity: Connectivity) -> &'static str {
    match connectivity {
        Connectivity::Online => "online",
        Connectivity::Degraded => "degraded",
        Connectivity::Offline => "offline",
    }
}

fn session_status_label(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Issued => "issued",
        SessionStatus::Active => "active",
        SessionStatus::Ended => "ended",
        SessionStatus::Expired => "expired",
    }
}

// ──────────────── GET /playback/:tenant/:camera/{index.m3u8,segment0.ts} ──

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

async fn handle_playback_manifest(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, camera_id)): Path<(String, String)>,
    Query(q): Query<TokenQuery>,
) -> Response {
    instrument_playback(&state, &tenant_id, &camera_id, AssetKind::Manifest, async {
        authorize_playback(&state, &tenant_id, &camera_id, q.token.as_deref())?;
        let policy = RetryPolicy {
            max_retries: state.config.read_retries,
            base_delay: state.config.read_retry_base,
            max_delay: state.config.read_retry_max,
        };
        let bytes = assets::read_with_retry(
            &state.config.storage_dir,
            &tenant_id,
            &camera_id,
            AssetKind::Manifest,
            policy,
            || state.metrics.record_read_retry(&tenant_id, &camera_id, AssetKind::Manifest.label()),
        )
        .await?;
        let body = String::from_utf8_lossy(&bytes);
        let token = q.token.as_deref().unwrap_or_default();
        let rewritten = assets::rewrite_manifest(&body, &tenant_id, &camera_id, token);
        Ok((
            StatusCode::OK,
            [("content-type", "application/vnd.apple.mpegurl")],
            rewritten,
        )
            .into_response())
    })
    .await
}

async fn handle_playback_segment(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, camera_id)): Path<(String, String)>,
    Query(q): Query<TokenQuery>,
) -> Response {
    instrument_playback(&state, &tenant_id, &camera_id, AssetKind::Segment, async {
        let payload = authorize_playback(&state, &tenant_id, &camera_id, q.token.as_deref())?;
        let _ = &payload;
        let policy = RetryPolicy {
            max_retries: state.config.read_retries,
            base_delay: state.config.read_retry_base,
            max_delay: state.config.read_retry_max,
        };
        let bytes = assets::read_with_retry(
            &state.config.storage_dir,
            &tenant_id,
            &camera_id,
            AssetKind::Segment,
            policy,
            || state.metrics.record_read_retry(&tenant_id, &camera_id, AssetKind::Segment.label()),
        )
        .await?;
        Ok((StatusCode::OK, [("content-type", "video/MP2T")], bytes).into_response())
    })
    .await
}

/// Steps 1-4 of the playback request order in §4.6: verify the token, check
/// scope, check stream presence/status, then observe the session. Shared by
/// both the manifest and segment handlers.
fn authorize_playback(
    state: &AppState,
    tenant_id: &str,
    camera_id: &str,
    token: Option<&str>,
) -> Result<TokenPayload> {
    let now = Utc::now().timestamp();
    let payload = token::verify(token, &state.config.token_secret, now)?;
    token::check_scope(&payload, tenant_id, camera_id)?;

    let key = StreamKey::new(tenant_id.to_string(), camera_id.to_string());
    match state.registry.get(&key) {
        None => return Err(GatewayError::StreamNotFound),
        Some(entry) => match entry.status {
            StreamStatus::Provisioning => return Err(GatewayError::StreamNotReady),
            StreamStatus::Stopped => return Err(GatewayError::StreamStopped),
            StreamStatus::Ready => {}
        },
    }

    state
        .sessions
        .observe(tenant_id, camera_id, &payload.sid, &payload.sub, payload.iat, payload.exp)
        .map_err(|_| GatewayError::SessionClosed)?;

    Ok(payload)
}

/// Wraps a playback handler body so that `nearhome_playback_requests_total`
/// (and, on error, `nearhome_playback_errors_total`) are recorded exactly
/// once regardless of which branch the body returns from — the Rust analog
/// of the spec's `finally`-style metrics wrapper.
async fn instrument_playback<F>(
    state: &AppState,
    tenant_id: &str,
    camera_id: &str,
    kind: AssetKind,
    body: F,
) -> Response
where
    F: std::future::Future<Output = Result<Response>>,
{
    match body.await {
        Ok(response) => {
            state
                .metrics
                .record_playback_request(tenant_id, camera_id, kind.label(), "ok");
            response
        }
        Err(err) => {
            state
                .metrics
                .record_playback_request(tenant_id, camera_id, kind.label(), "error");
            state
                .metrics
                .record_playback_error(tenant_id, camera_id, kind.label(), err.code());
            err.into_response()
        }
    }
}

// ──────────────── GET /sessions, POST /sessions/sweep ─────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionsQuery {
    tenant_id: Option<String>,
    camera_id: Option<String>,
    status: Option<String>,
    sid: Option<String>,
}

fn parse_session_status(raw: &str) -> Result<SessionStatus> {
    match raw {
        "issued" => Ok(SessionStatus::Issued),
        "active" => Ok(SessionStatus::Active),
        "ended" => Ok(SessionStatus::Ended),
        "expired" => Ok(SessionStatus::Expired),
        other => Err(validation_error(vec![FieldError {
            field: "status",
            message: format!("unknown session status {other:?}"),
        }])),
    }
}

async fn handle_sessions_list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionsQuery>,
) -> Result<impl IntoResponse> {
    let status = q.status.as_deref().map(parse_session_status).transpose()?;
    let sessions = state
        .sessions
        .list(q.tenant_id.as_deref(), q.camera_id.as_deref(), status, q.sid.as_deref());
    let total = sessions.len();
    Ok(Json(json!({ "data": sessions, "total": total })))
}

async fn handle_sessions_sweep(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counts = state.sessions.sweep(state.config.session_idle_ttl);
    state.metrics.record_sweep();
    Json(json!({ "data": { "expired": counts.expired, "ended": counts.ended } }))
}
