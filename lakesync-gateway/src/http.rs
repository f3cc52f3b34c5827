//! HTTP surface — axum router over the gateway
//!
//! `POST /push`, `POST /pull`, `POST /flush`, `GET /stats`, `GET /health`.
//! Bearer tokens ride the `Authorization` header; error codes map onto
//! status codes (401 auth, 413 backpressure, 500 otherwise) with the stable
//! code string in the body.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use lakesync_core::LakeSyncError;

use crate::gateway::{PullRequest, PushRequest, SyncGateway};

/// Build the gateway router
pub fn router(gateway: Arc<SyncGateway>) -> Router {
    Router::new()
        .route("/push", post(handle_push))
        .route("/pull", post(handle_pull))
        .route("/flush", post(handle_flush))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

/// Serve the router on `addr` until the process ends
pub async fn serve(gateway: Arc<SyncGateway>, addr: &str) -> lakesync_core::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LakeSyncError::Http(format!("bind {addr}: {e}")))?;
    info!(addr, "Gateway HTTP server listening");
    axum::serve(listener, router(gateway))
        .await
        .map_err(|e| LakeSyncError::Http(e.to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, Response> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            error_response(&LakeSyncError::AuthFailed("missing bearer token".into()))
        })
}

fn error_response(error: &LakeSyncError) -> Response {
    let status = match error {
        LakeSyncError::AuthFailed(_) | LakeSyncError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
        LakeSyncError::BufferFull { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": error.to_string(), "code": error.code()}))).into_response()
}

async fn handle_push(
    State(gateway): State<Arc<SyncGateway>>,
    headers: HeaderMap,
    Json(request): Json<PushRequest>,
) -> Response {
    let token = match bearer_token(&headers) {
        Ok(token) => token,
        Err(response) => return response,
    };
    match gateway.handle_push(token, request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_pull(
    State(gateway): State<Arc<SyncGateway>>,
    headers: HeaderMap,
    Json(request): Json<PullRequest>,
) -> Response {
    let token = match bearer_token(&headers) {
        Ok(token) => token,
        Err(response) => return response,
    };
    match gateway.handle_pull(token, request) {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_flush(State(gateway): State<Arc<SyncGateway>>) -> Response {
    match gateway.flush().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_stats(State(gateway): State<Arc<SyncGateway>>) -> Response {
    Json(json!({
        "bufferStats": gateway.buffer_stats(),
        "lastSyncTime": gateway.last_sync_time(),
    }))
    .into_response()
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
