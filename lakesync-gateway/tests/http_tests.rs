//! HTTP surface tests — status mapping and wire shapes

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use lakesync_core::{sign_token, ColumnDelta, DeltaOp, Hlc, RowDelta};
use lakesync_gateway::{router, GatewayConfig, SyncGateway};
use lakesync_lake::ParquetLake;

const SECRET: &str = "test-secret-key-for-testing-only";
const GATEWAY_ID: &str = "gw-http";

fn gateway() -> Arc<SyncGateway> {
    SyncGateway::builder(GatewayConfig::new(GATEWAY_ID).with_jwt_secret(SECRET))
        .with_lake(Arc::new(ParquetLake::memory()))
        .start()
        .unwrap()
}

fn push_body() -> Value {
    let delta = RowDelta::new(
        DeltaOp::Insert,
        "todos",
        "1",
        "client-a",
        Hlc::encode(100, 0),
        vec![ColumnDelta::new("title", json!("x"))],
    );
    json!({
        "clientId": "client-a",
        "deltas": [delta],
        "lastSeenHlc": "0",
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn request(path: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(if body.is_some() || path == "/flush" { "POST" } else { "GET" })
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap()
}

#[tokio::test]
async fn test_push_returns_acked_ids_and_server_hlc() {
    let app = router(gateway());
    let token = sign_token(SECRET, "client-a", GATEWAY_ID, 1).unwrap();

    let response =
        app.oneshot(request("/push", Some(&token), Some(push_body()))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ackedIds"].as_array().unwrap().len(), 1);
    // HLCs travel as decimal strings.
    assert!(body["serverHlc"].is_string());
}

#[tokio::test]
async fn test_missing_token_is_401() {
    let app = router(gateway());
    let response = app.oneshot(request("/push", None, Some(push_body()))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "AUTH_FAILED");
}

#[tokio::test]
async fn test_wrong_audience_is_401() {
    let app = router(gateway());
    let token = sign_token(SECRET, "client-a", "other-gateway", 1).unwrap();
    let response =
        app.oneshot(request("/push", Some(&token), Some(push_body()))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_buffer_full_is_413() {
    let gw = SyncGateway::builder(
        GatewayConfig::new(GATEWAY_ID).with_jwt_secret(SECRET).with_max_buffer_bytes(40),
    )
    .start()
    .unwrap();
    let app = router(gw);
    let token = sign_token(SECRET, "client-a", GATEWAY_ID, 1).unwrap();

    let big = RowDelta::new(
        DeltaOp::Insert,
        "todos",
        "1",
        "client-a",
        Hlc::encode(100, 0),
        vec![ColumnDelta::new("blob", json!("x".repeat(500)))],
    );
    let body = json!({"clientId": "client-a", "deltas": [big], "lastSeenHlc": "0"});
    let response = app.oneshot(request("/push", Some(&token), Some(body))).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["code"], "BUFFER_FULL");
}

#[tokio::test]
async fn test_pull_roundtrip() {
    let gw = gateway();
    let token = sign_token(SECRET, "client-a", GATEWAY_ID, 1).unwrap();
    let app = router(gw.clone());
    app.oneshot(request("/push", Some(&token), Some(push_body()))).await.unwrap();

    let pull_body = json!({"clientId": "client-b", "sinceHlc": "0", "maxDeltas": 10});
    let response = router(gw)
        .oneshot(request("/pull", Some(&token), Some(pull_body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["deltas"].as_array().unwrap().len(), 1);
    assert_eq!(body["deltas"][0]["rowId"], "1");
}

#[tokio::test]
async fn test_flush_stats_and_health() {
    let gw = gateway();
    let token = sign_token(SECRET, "client-a", GATEWAY_ID, 1).unwrap();
    router(gw.clone())
        .oneshot(request("/push", Some(&token), Some(push_body())))
        .await
        .unwrap();

    let response = router(gw.clone()).oneshot(request("/flush", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["deltasFlushed"], 1);

    let response = router(gw.clone()).oneshot(request("/stats", None, None)).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["bufferStats"]["logSize"], 0);
    assert!(body["lastSyncTime"].is_number());

    let response = router(gw).oneshot(request("/health", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}
