//! Gateway integration tests — push/pull/flush protocol and sync scenarios

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use lakesync_core::{
    apply_remote_deltas, project_row_state, sign_token, sort_for_replay, ColumnDelta, ColumnType,
    ColumnValue, DeltaOp, Hlc, HlcClock, LakeAdapter, LakeSyncError, ManualClock,
    MemoryLocalStore, MemoryPendingQueue, Result, RowDelta, TableSchema,
};
use lakesync_gateway::{FlushFormat, GatewayConfig, PullRequest, PushRequest, SyncGateway};
use lakesync_lake::{read_parquet_to_deltas, ObjectStoreAdapter, ParquetLake};

const SECRET: &str = "test-secret-key-for-testing-only";
const GATEWAY_ID: &str = "gw-test";

fn token_for(client: &str) -> String {
    sign_token(SECRET, client, GATEWAY_ID, 1).unwrap()
}

fn config() -> GatewayConfig {
    GatewayConfig::new(GATEWAY_ID).with_jwt_secret(SECRET)
}

fn delta(
    op: DeltaOp,
    row: &str,
    hlc: u64,
    client: &str,
    cols: Vec<(&str, serde_json::Value)>,
) -> RowDelta {
    RowDelta::new(
        op,
        "todos",
        row,
        client,
        Hlc::encode(hlc, 0),
        cols.into_iter().map(|(c, v)| ColumnDelta::new(c, v)).collect(),
    )
}

fn push_request(client: &str, deltas: Vec<RowDelta>) -> PushRequest {
    PushRequest { client_id: client.to_string(), deltas, last_seen_hlc: Hlc::ZERO }
}

fn pull_request(client: &str, since: Hlc) -> PullRequest {
    PullRequest { client_id: client.to_string(), since_hlc: since, max_deltas: 100 }
}

/// Lake adapter that fails a configurable number of writes
struct FlakyLake {
    inner: ObjectStoreAdapter,
    failures_left: AtomicUsize,
    keys: Mutex<Vec<String>>,
}

impl FlakyLake {
    fn failing(times: usize) -> Self {
        Self {
            inner: ObjectStoreAdapter::memory(),
            failures_left: AtomicUsize::new(times),
            keys: Mutex::new(Vec::new()),
        }
    }

    fn written_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl LakeAdapter for FlakyLake {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LakeSyncError::AdapterError("object store unavailable".into()));
        }
        self.keys.lock().unwrap().push(key.to_string());
        self.inner.put_object(key, bytes).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get_object(key).await
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_objects(prefix).await
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.inner.delete_object(key).await
    }
}

// ─── Protocol basics ───

#[tokio::test]
async fn test_push_then_pull_roundtrip() {
    let gateway = SyncGateway::builder(config()).start().unwrap();
    let deltas = vec![
        delta(DeltaOp::Insert, "1", 100, "a", vec![("title", json!("x"))]),
        delta(DeltaOp::Update, "1", 200, "a", vec![("done", json!(true))]),
    ];
    let response = gateway
        .handle_push(&token_for("a"), push_request("a", deltas.clone()))
        .await
        .unwrap();
    assert_eq!(response.acked_ids.len(), 2);
    assert!(response.server_hlc > deltas[1].hlc);

    let pulled = gateway.handle_pull(&token_for("b"), pull_request("b", Hlc::ZERO)).unwrap();
    assert_eq!(pulled.deltas, deltas);
}

#[tokio::test]
async fn test_auth_rejects_wrong_audience() {
    let gateway = SyncGateway::builder(config()).start().unwrap();
    let foreign = sign_token(SECRET, "a", "other-gateway", 1).unwrap();
    let err = gateway
        .handle_push(&foreign, push_request("a", vec![]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUTH_FAILED");

    let err = gateway.handle_pull(&foreign, pull_request("a", Hlc::ZERO)).unwrap_err();
    assert_eq!(err.code(), "AUTH_FAILED");
}

#[tokio::test]
async fn test_duplicate_push_is_idempotent() {
    let gateway = SyncGateway::builder(config()).start().unwrap();
    let batch = vec![delta(DeltaOp::Insert, "1", 100, "a", vec![("title", json!("x"))])];

    let first = gateway.handle_push(&token_for("a"), push_request("a", batch.clone())).await.unwrap();
    let second = gateway.handle_push(&token_for("a"), push_request("a", batch)).await.unwrap();
    assert_eq!(first.acked_ids, second.acked_ids);
    assert_eq!(gateway.buffer_stats().log_size, 1);
}

#[tokio::test]
async fn test_malformed_delta_dropped_not_fatal() {
    let gateway = SyncGateway::builder(config()).start().unwrap();
    let good = delta(DeltaOp::Insert, "1", 100, "a", vec![("title", json!("x"))]);
    let mut forged = delta(DeltaOp::Insert, "2", 100, "a", vec![("title", json!("y"))]);
    forged.delta_id = "0".repeat(64);

    let response = gateway
        .handle_push(&token_for("a"), push_request("a", vec![forged, good.clone()]))
        .await
        .unwrap();
    assert_eq!(response.acked_ids, vec![good.delta_id]);
    assert_eq!(gateway.buffer_stats().log_size, 1);
}

#[tokio::test]
async fn test_empty_push_pull_flush_are_noops() {
    let lake = Arc::new(ParquetLake::memory());
    let gateway = SyncGateway::builder(config()).with_lake(lake).start().unwrap();

    let push = gateway.handle_push(&token_for("a"), push_request("a", vec![])).await.unwrap();
    assert!(push.acked_ids.is_empty());

    let pull = gateway.handle_pull(&token_for("a"), pull_request("a", Hlc::ZERO)).unwrap();
    assert!(pull.deltas.is_empty());

    let report = gateway.flush().await.unwrap();
    assert_eq!(report.deltas_flushed, 0);
}

#[tokio::test]
async fn test_buffer_full_backpressure() {
    let gateway = SyncGateway::builder(config().with_max_buffer_bytes(300)).start().unwrap();
    let big = delta(
        DeltaOp::Insert,
        "1",
        100,
        "a",
        vec![("blob", json!("x".repeat(200)))],
    );
    gateway
        .handle_push(&token_for("a"), push_request("a", vec![big]))
        .await
        .unwrap();
    let more = delta(DeltaOp::Insert, "2", 101, "a", vec![("blob", json!("y".repeat(200)))]);
    let err = gateway
        .handle_push(&token_for("a"), push_request("a", vec![more]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BUFFER_FULL");
}

// ─── Flush behaviour ───

#[tokio::test]
async fn test_flush_without_adapter_fails() {
    let gateway = SyncGateway::builder(config()).start().unwrap();
    gateway
        .handle_push(
            &token_for("a"),
            push_request("a", vec![delta(DeltaOp::Insert, "1", 100, "a", vec![("t", json!(1))])]),
        )
        .await
        .unwrap();
    let err = gateway.flush().await.unwrap_err();
    assert_eq!(err.code(), "NO_ADAPTER");
}

#[tokio::test]
async fn test_flush_failure_restores_buffer() {
    let lake = Arc::new(FlakyLake::failing(1));
    let gateway = SyncGateway::builder(config()).with_lake(lake.clone()).start().unwrap();

    let deltas = vec![
        delta(DeltaOp::Insert, "1", 100, "a", vec![("t", json!(1))]),
        delta(DeltaOp::Insert, "2", 101, "a", vec![("t", json!(2))]),
        delta(DeltaOp::Insert, "3", 102, "a", vec![("t", json!(3))]),
    ];
    gateway.handle_push(&token_for("a"), push_request("a", deltas.clone())).await.unwrap();

    let err = gateway.flush().await.unwrap_err();
    assert_eq!(err.code(), "FLUSH_FAILED");
    assert_eq!(gateway.buffer_stats().log_size, 3);
    assert!(gateway.last_sync_time().is_none());

    // Retry stores exactly those three deltas.
    let report = gateway.flush().await.unwrap();
    assert_eq!(report.deltas_flushed, 3);
    assert_eq!(gateway.buffer_stats().log_size, 0);
    assert!(gateway.last_sync_time().is_some());

    let keys = lake.written_keys();
    assert_eq!(keys.len(), 1);
    let envelope: serde_json::Value =
        serde_json::from_slice(&lake.get_object(&keys[0]).await.unwrap()).unwrap();
    assert_eq!(envelope["deltas"].as_array().unwrap().len(), 3);
    assert_eq!(envelope["gatewayId"], GATEWAY_ID);
}

#[tokio::test]
async fn test_parquet_flush_roundtrip() {
    let lake = Arc::new(ParquetLake::memory());
    let schemas = vec![TableSchema::new(
        "todos",
        vec![("title", ColumnType::String), ("done", ColumnType::Boolean)],
    )];
    let gateway = SyncGateway::builder(
        config().with_flush_format(FlushFormat::Parquet).with_table_schemas(schemas),
    )
    .with_lake(lake.clone())
    .start()
    .unwrap();

    let deltas = vec![
        delta(DeltaOp::Insert, "1", 100, "a", vec![("title", json!("x")), ("done", json!(true))]),
        delta(DeltaOp::Delete, "2", 101, "a", vec![]),
    ];
    gateway.handle_push(&token_for("a"), push_request("a", deltas.clone())).await.unwrap();
    let report = gateway.flush().await.unwrap();
    assert_eq!(report.deltas_flushed, 2);

    let keys = lake.list_objects(&format!("deltas/{GATEWAY_ID}")).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].ends_with(".parquet"));
    let decoded = read_parquet_to_deltas(&lake.get_object(&keys[0]).await.unwrap()).unwrap();
    assert_eq!(decoded, deltas);

    // The parquet lake also materialised current state.
    let state_keys = lake.list_objects("materialised/todos").await.unwrap();
    assert_eq!(state_keys, vec!["materialised/todos/current.parquet"]);
}

#[tokio::test]
async fn test_size_trigger_flushes_in_background() {
    let lake = Arc::new(ParquetLake::memory());
    let gateway = SyncGateway::builder(config().with_max_buffer_bytes(200))
        .with_lake(lake.clone())
        .start()
        .unwrap();

    gateway
        .handle_push(
            &token_for("a"),
            push_request(
                "a",
                vec![delta(DeltaOp::Insert, "1", 100, "a", vec![("blob", json!("z".repeat(80)))])],
            ),
        )
        .await
        .unwrap();

    // The triggered flush runs on the background task.
    for _ in 0..50 {
        if gateway.buffer_stats().log_size == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(gateway.buffer_stats().log_size, 0);
    assert_eq!(lake.list_objects(&format!("deltas/{GATEWAY_ID}")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_conservation_across_pushes_and_flushes() {
    let lake = Arc::new(ParquetLake::memory());
    let gateway = SyncGateway::builder(config()).with_lake(lake.clone()).start().unwrap();

    let mut accepted = 0usize;
    for round in 0u64..5 {
        let batch: Vec<RowDelta> = (0..4)
            .map(|i| {
                delta(
                    DeltaOp::Insert,
                    &format!("r{round}-{i}"),
                    1000 + round * 10 + i,
                    "a",
                    vec![("v", json!(i))],
                )
            })
            .collect();
        accepted += gateway
            .handle_push(&token_for("a"), push_request("a", batch))
            .await
            .unwrap()
            .acked_ids
            .len();
        if round % 2 == 1 {
            gateway.flush().await.unwrap();
        }
    }

    let mut flushed = 0usize;
    for key in lake.list_objects(&format!("deltas/{GATEWAY_ID}")).await.unwrap() {
        let envelope: serde_json::Value =
            serde_json::from_slice(&lake.get_object(&key).await.unwrap()).unwrap();
        flushed += envelope["deltas"].as_array().unwrap().len();
    }
    assert_eq!(flushed + gateway.buffer_stats().log_size, accepted);
}

// ─── End-to-end sync scenarios ───

#[tokio::test]
async fn test_two_client_column_merge() {
    let gateway = SyncGateway::builder(config()).start().unwrap();

    // Both clients start from {title: "X", done: 0}; A changes the title,
    // B completes the task.
    gateway
        .handle_push(
            &token_for("client-a"),
            push_request(
                "client-a",
                vec![delta(DeltaOp::Update, "1", 100, "client-a", vec![("title", json!("A"))])],
            ),
        )
        .await
        .unwrap();
    gateway
        .handle_push(
            &token_for("client-b"),
            push_request(
                "client-b",
                vec![delta(DeltaOp::Update, "1", 101, "client-b", vec![("done", json!(1))])],
            ),
        )
        .await
        .unwrap();

    // A third client pulls from zero and applies LWW locally.
    let pulled = gateway.handle_pull(&token_for("client-c"), pull_request("client-c", Hlc::ZERO)).unwrap();
    let store = MemoryLocalStore::new();
    let pending = MemoryPendingQueue::new();
    let applied = apply_remote_deltas(&store, &pending, &pulled.deltas).await.unwrap();
    assert_eq!(applied, 2);

    let row = store.row_values("todos", "1").unwrap();
    assert_eq!(row["title"], ColumnValue::Text("A".into()));
    assert_eq!(row["done"], ColumnValue::Integer(1));
}

#[tokio::test]
async fn test_same_column_conflict_highest_hlc_wins() {
    let gateway = SyncGateway::builder(config()).start().unwrap();
    gateway
        .handle_push(
            &token_for("client-a"),
            push_request(
                "client-a",
                vec![delta(DeltaOp::Update, "1", 100, "client-a", vec![("title", json!("A"))])],
            ),
        )
        .await
        .unwrap();
    gateway
        .handle_push(
            &token_for("client-b"),
            push_request(
                "client-b",
                vec![delta(DeltaOp::Update, "1", 101, "client-b", vec![("title", json!("B"))])],
            ),
        )
        .await
        .unwrap();

    // Both deltas remain in the log; the projection resolves to B.
    let pulled = gateway.handle_pull(&token_for("c"), pull_request("c", Hlc::ZERO)).unwrap();
    assert_eq!(pulled.deltas.len(), 2);
    let mut history = pulled.deltas.clone();
    sort_for_replay(&mut history);
    let state = project_row_state(&history).unwrap();
    assert_eq!(state["title"], ColumnValue::Text("B".into()));
}

#[tokio::test]
async fn test_local_pending_wins_over_remote() {
    let gateway = SyncGateway::builder(config()).start().unwrap();
    gateway
        .handle_push(
            &token_for("client-a"),
            push_request(
                "client-a",
                vec![delta(DeltaOp::Update, "1", 150, "client-a", vec![("title", json!("remote"))])],
            ),
        )
        .await
        .unwrap();

    // Client B holds a newer pending local write for the same column.
    let store = MemoryLocalStore::new();
    let pending = MemoryPendingQueue::new();
    let local = delta(DeltaOp::Update, "1", 200, "client-b", vec![("title", json!("local"))]);
    store.seed(
        "todos",
        "1",
        vec![(
            "title".to_string(),
            lakesync_core::ColumnState::new(json!("local"), Hlc::encode(200, 0), "client-b"),
        )],
    );
    pending.enqueue(local);

    let pulled = gateway.handle_pull(&token_for("client-b"), pull_request("client-b", Hlc::ZERO)).unwrap();
    let applied = apply_remote_deltas(&store, &pending, &pulled.deltas).await.unwrap();

    assert_eq!(applied, 0);
    assert_eq!(
        store.row_values("todos", "1").unwrap()["title"],
        ColumnValue::Text("local".into())
    );
    // The pending local delta still awaits push.
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn test_pull_is_repeatable_between_flushes() {
    let gateway = SyncGateway::builder(config()).start().unwrap();
    gateway
        .handle_push(
            &token_for("a"),
            push_request("a", vec![delta(DeltaOp::Insert, "1", 100, "a", vec![("v", json!(1))])]),
        )
        .await
        .unwrap();

    let first = gateway.handle_pull(&token_for("b"), pull_request("b", Hlc::ZERO)).unwrap();
    let second = gateway.handle_pull(&token_for("b"), pull_request("b", Hlc::ZERO)).unwrap();
    assert_eq!(first.deltas, second.deltas);
}

#[tokio::test]
async fn test_clock_drift_delta_dropped() {
    let clock = HlcClock::new(Box::new(ManualClock::new(10_000)));
    let gateway = SyncGateway::builder(config()).with_clock(clock).start().unwrap();

    // Peer wall more than a minute ahead of the frozen local clock.
    let drifted = delta(DeltaOp::Insert, "1", 10_000 + 61_000, "a", vec![("v", json!(1))]);
    let ok = delta(DeltaOp::Insert, "2", 10_500, "a", vec![("v", json!(2))]);
    let response = gateway
        .handle_push(&token_for("a"), push_request("a", vec![drifted, ok.clone()]))
        .await
        .unwrap();
    assert_eq!(response.acked_ids, vec![ok.delta_id]);
}
