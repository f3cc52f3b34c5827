//! CDC source integration tests — polling loop, cursor resume, REST diffing

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use lakesync_cdc::{
    CdcBatch, CdcCursor, CdcDialect, CdcRawChange, CdcSource, CdcSourceConfig, ChangeKind,
    PostgresCdcDialect, RestPoller, RestPollerConfig,
};
use lakesync_core::{
    ColumnDelta, DeltaOp, DeltaSink, HlcClock, LakeSyncError, ManualClock, Result, RowDelta,
    SqlExecutor, SqlRow, SqlValue, TableSchema,
};

// ─── Test doubles ───

#[derive(Default)]
struct CollectingSink {
    pushed: Mutex<Vec<RowDelta>>,
    fail: Mutex<bool>,
}

impl CollectingSink {
    fn pushed(&self) -> Vec<RowDelta> {
        self.pushed.lock().unwrap().clone()
    }

    fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl DeltaSink for CollectingSink {
    async fn push(&self, _client_id: &str, deltas: Vec<RowDelta>) -> Result<Vec<String>> {
        if *self.fail.lock().unwrap() {
            return Err(LakeSyncError::AdapterError("sink down".into()));
        }
        let ids = deltas.iter().map(|d| d.delta_id.clone()).collect();
        self.pushed.lock().unwrap().extend(deltas);
        Ok(ids)
    }
}

struct ScriptedDialect {
    batches: Mutex<Vec<CdcBatch>>,
    closed: Mutex<bool>,
}

impl ScriptedDialect {
    fn new(batches: Vec<CdcBatch>) -> Self {
        Self { batches: Mutex::new(batches), closed: Mutex::new(false) }
    }
}

#[async_trait]
impl CdcDialect for ScriptedDialect {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }

    async fn ensure_capture(&self, _tables: Option<&[String]>) -> Result<()> {
        Ok(())
    }

    async fn fetch_changes(&self, cursor: &CdcCursor) -> Result<CdcBatch> {
        let mut batches = self.batches.lock().unwrap();
        if batches.is_empty() {
            return Ok(CdcBatch { changes: Vec::new(), cursor: cursor.clone() });
        }
        Ok(batches.remove(0))
    }

    async fn discover_schemas(&self, _tables: Option<&[String]>) -> Result<Vec<TableSchema>> {
        Ok(Vec::new())
    }

    fn default_cursor(&self) -> CdcCursor {
        CdcCursor::last_id(0)
    }
}

fn change(table: &str, row: &str) -> CdcRawChange {
    CdcRawChange {
        kind: ChangeKind::Insert,
        schema: "public".into(),
        table: table.into(),
        row_id: row.into(),
        columns: vec![ColumnDelta::new("v", json!(1))],
        captured_at_ms: Some(5_000),
    }
}

fn test_clock() -> Arc<HlcClock> {
    Arc::new(HlcClock::new(Box::new(ManualClock::new(10_000))))
}

// ─── Polling loop ───

#[tokio::test]
async fn test_source_pushes_and_advances_cursor() {
    let dialect = Arc::new(ScriptedDialect::new(vec![CdcBatch {
        changes: vec![change("todos", "1"), change("todos", "2")],
        cursor: CdcCursor::last_id(2),
    }]));
    let sink = Arc::new(CollectingSink::default());

    let source = CdcSource::start(
        dialect,
        sink.clone(),
        test_clock(),
        CdcSourceConfig::new("cdc-test").with_poll_interval_ms(10),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let pushed = sink.pushed();
    assert_eq!(pushed.len(), 2);
    assert_eq!(pushed[0].op, DeltaOp::Insert);
    assert_eq!(pushed[0].client_id, "cdc-test");
    assert_eq!(source.cursor(), CdcCursor::last_id(2));
    source.stop().await;
}

#[tokio::test]
async fn test_table_filter_drops_unconfigured_tables() {
    let dialect = Arc::new(ScriptedDialect::new(vec![CdcBatch {
        changes: vec![change("todos", "1"), change("other", "9")],
        cursor: CdcCursor::last_id(2),
    }]));
    let sink = Arc::new(CollectingSink::default());

    let source = CdcSource::start(
        dialect,
        sink.clone(),
        test_clock(),
        CdcSourceConfig::new("cdc-test")
            .with_tables(vec!["todos".to_string()])
            .with_poll_interval_ms(10),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let pushed = sink.pushed();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].table, "todos");
    source.stop().await;
}

#[tokio::test]
async fn test_push_failure_keeps_cursor_and_loop_alive() {
    let dialect = Arc::new(ScriptedDialect::new(vec![
        CdcBatch { changes: vec![change("todos", "1")], cursor: CdcCursor::last_id(1) },
        CdcBatch { changes: vec![change("todos", "2")], cursor: CdcCursor::last_id(2) },
    ]));
    let sink = Arc::new(CollectingSink::default());
    sink.set_fail(true);

    let source = CdcSource::start(
        dialect,
        sink.clone(),
        test_clock(),
        CdcSourceConfig::new("cdc-test").with_poll_interval_ms(10),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(40)).await;
    // The first tick failed at the sink: nothing pushed, cursor unchanged.
    assert_eq!(source.cursor(), CdcCursor::last_id(0));

    sink.set_fail(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    // The loop survived and the remaining batches flowed through.
    assert!(!sink.pushed().is_empty());
    source.stop().await;
}

// ─── Postgres cursor resume (scripted executor) ───

#[derive(Default)]
struct QueueExecutor {
    responses: Mutex<Vec<Vec<SqlRow>>>,
}

impl QueueExecutor {
    fn push_response(&self, rows: Vec<SqlRow>) {
        self.responses.lock().unwrap().push(rows);
    }
}

#[async_trait]
impl SqlExecutor for QueueExecutor {
    async fn execute(&self, _sql: &str, _params: &[SqlValue]) -> Result<u64> {
        Ok(0)
    }

    async fn query(&self, _sql: &str, _params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(Vec::new());
        }
        Ok(responses.remove(0))
    }
}

fn wal_row(lsn: &str, table: &str, id: i64) -> SqlRow {
    let data = json!({
        "change": [{
            "kind": "insert",
            "schema": "public",
            "table": table,
            "columnnames": ["id", "v"],
            "columnvalues": [id, "x"],
        }]
    });
    SqlRow::new(vec![
        ("lsn", SqlValue::Text(lsn.into())),
        ("xid", SqlValue::Text("100".into())),
        ("data", SqlValue::Text(data.to_string())),
    ])
}

#[tokio::test]
async fn test_postgres_cursor_resume_skips_replayed_rows() {
    let executor = Arc::new(QueueExecutor::default());
    let dialect = PostgresCdcDialect::new(executor.clone());

    // First consumption: three changes up to 0/16B3748.
    executor.push_response(vec![
        wal_row("0/16B3700", "todos", 1),
        wal_row("0/16B3720", "todos", 2),
        wal_row("0/16B3748", "todos", 3),
    ]);
    let batch = dialect.fetch_changes(&dialect.default_cursor()).await.unwrap();
    assert_eq!(batch.changes.len(), 3);
    assert_eq!(batch.cursor, CdcCursor::lsn("0/16B3748"));

    // Restart: the server re-delivers the same rows; the cursor filters them.
    executor.push_response(vec![
        wal_row("0/16B3700", "todos", 1),
        wal_row("0/16B3720", "todos", 2),
        wal_row("0/16B3748", "todos", 3),
    ]);
    let replay = dialect.fetch_changes(&batch.cursor).await.unwrap();
    assert!(replay.changes.is_empty());
    assert_eq!(replay.cursor, CdcCursor::lsn("0/16B3748"));

    // A new upstream write appears with a monotonic LSN: only it comes back.
    executor.push_response(vec![
        wal_row("0/16B3748", "todos", 3),
        wal_row("0/16B3800", "todos", 4),
    ]);
    let fresh = dialect.fetch_changes(&replay.cursor).await.unwrap();
    assert_eq!(fresh.changes.len(), 1);
    assert_eq!(fresh.changes[0].row_id, "4");
    assert_eq!(fresh.cursor, CdcCursor::lsn("0/16B3800"));
}

// ─── REST poller ───

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_poller_diffs_snapshots() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "A-1", "title": "first", "updated_at": "2026-01-01T00:00:00Z"},
            {"id": "A-2", "title": "second", "updated_at": "2026-01-02T00:00:00Z"},
        ])))
        .mount(&server)
        .await;

    let poller = RestPoller::new(
        RestPollerConfig::new("jira", format!("{}/issues", server.uri()), "tickets")
            .with_full_snapshot(true),
    );
    let clock = HlcClock::new(Box::new(ManualClock::new(1_000)));

    let (deltas, cursor) = poller.poll_once(&CdcCursor::poll_start(), &clock).await.unwrap();
    assert_eq!(deltas.len(), 2);
    assert!(deltas.iter().all(|d| d.op == DeltaOp::Insert));
    match &cursor {
        CdcCursor::Poll { updated_since, snapshots } => {
            assert_eq!(updated_since, "2026-01-02T00:00:00Z");
            assert_eq!(snapshots.len(), 2);
        }
        other => panic!("unexpected cursor {other:?}"),
    }

    // Unchanged data: the second poll yields nothing.
    let (again, _) = poller.poll_once(&cursor, &clock).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_poller_full_snapshot_emits_deletes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "A-1", "title": "only", "updated_at": "2026-01-03T00:00:00Z"},
        ])))
        .mount(&server)
        .await;

    let poller = RestPoller::new(
        RestPollerConfig::new("jira", format!("{}/issues", server.uri()), "tickets")
            .with_full_snapshot(true),
    );
    let clock = HlcClock::new(Box::new(ManualClock::new(1_000)));

    let mut snapshots = std::collections::HashMap::new();
    snapshots.insert(
        "A-1".to_string(),
        json!({"id": "A-1", "title": "only", "updated_at": "2026-01-03T00:00:00Z"}),
    );
    snapshots.insert("A-9".to_string(), json!({"id": "A-9", "title": "gone"}));
    let cursor = CdcCursor::Poll { updated_since: "2026-01-01T00:00:00Z".into(), snapshots };

    let (deltas, next) = poller.poll_once(&cursor, &clock).await.unwrap();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].op, DeltaOp::Delete);
    assert_eq!(deltas[0].row_id, "A-9");
    match next {
        CdcCursor::Poll { snapshots, .. } => assert!(!snapshots.contains_key("A-9")),
        other => panic!("unexpected cursor {other:?}"),
    }
}

#[tokio::test]
async fn test_poller_rate_limit_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .expect(3)
        .mount(&server)
        .await;

    let poller =
        RestPoller::new(RestPollerConfig::new("jira", server.uri(), "tickets"));
    let clock = HlcClock::new(Box::new(ManualClock::new(1_000)));
    let err = poller.poll_once(&CdcCursor::poll_start(), &clock).await.unwrap_err();
    assert_eq!(err.code(), "RATE_LIMITED");
}
