//! REST base poller — cursor + diff-snapshot ingestion for API sources
//!
//! For upstreams without a change log the poller fetches records, keeps the
//! previous image of every row in its cursor, and turns differences into
//! deltas through the shared extractor. Full-snapshot sources additionally
//! yield DELETE deltas for rows that vanish between polls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use lakesync_core::{
    extract_delta, DeltaSink, ExtractContext, HlcClock, LakeSyncError, Record, Result, RowDelta,
};

use crate::dialect::CdcCursor;
use crate::source::DEFAULT_POLL_INTERVAL_MS;

const MAX_FETCH_ATTEMPTS: usize = 3;

/// Configuration of one REST polling source
#[derive(Debug, Clone)]
pub struct RestPollerConfig {
    /// Client id the poller pushes under
    pub name: String,
    pub endpoint: String,
    /// Destination table the records map to
    pub table: String,
    /// Field carrying the row identity
    pub id_field: String,
    /// Field carrying the record's last-modified timestamp
    pub updated_field: String,
    pub bearer_token: Option<String>,
    /// Whether each poll returns the complete data set (enables deletions)
    pub full_snapshot: bool,
    pub poll_interval_ms: u64,
}

impl RestPollerConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            table: table.into(),
            id_field: "id".to_string(),
            updated_field: "updated_at".to_string(),
            bearer_token: None,
            full_snapshot: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn with_updated_field(mut self, field: impl Into<String>) -> Self {
        self.updated_field = field.into();
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_full_snapshot(mut self, full_snapshot: bool) -> Self {
        self.full_snapshot = full_snapshot;
        self
    }

    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }
}

/// REST polling source
pub struct RestPoller {
    client: reqwest::Client,
    config: RestPollerConfig,
}

impl RestPoller {
    pub fn new(config: RestPollerConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }

    /// One poll: fetch, diff against snapshots, emit deltas + next cursor
    pub async fn poll_once(
        &self,
        cursor: &CdcCursor,
        clock: &HlcClock,
    ) -> Result<(Vec<RowDelta>, CdcCursor)> {
        let (updated_since, snapshots) = match cursor {
            CdcCursor::Poll { updated_since, snapshots } => {
                (updated_since.clone(), snapshots.clone())
            }
            _ => (String::new(), HashMap::new()),
        };

        let records = self.fetch_records(&updated_since).await?;

        let mut deltas = Vec::new();
        let mut next_snapshots = snapshots.clone();
        let mut watermark = updated_since.clone();
        let mut seen_ids = Vec::new();

        for record in &records {
            let Some(row_id) = record
                .get(&self.config.id_field)
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            else {
                warn!(field = %self.config.id_field, "Record without id field, skipped");
                continue;
            };
            seen_ids.push(row_id.clone());

            if let Some(updated) = record.get(&self.config.updated_field).and_then(Value::as_str) {
                if updated > watermark.as_str() {
                    watermark = updated.to_string();
                }
            }

            let after: Record = record
                .as_object()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            let before: Option<Record> = snapshots.get(&row_id).and_then(|v| {
                v.as_object()
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            });

            let ctx = ExtractContext::new(
                self.config.table.clone(),
                row_id.clone(),
                self.config.name.clone(),
                clock.now(),
            );
            if let Some(delta) = extract_delta(before.as_ref(), Some(&after), &ctx) {
                deltas.push(delta);
            }
            next_snapshots.insert(row_id, record.clone());
        }

        // A full snapshot that no longer contains a row means it was deleted.
        if self.config.full_snapshot {
            let gone: Vec<String> = snapshots
                .keys()
                .filter(|id| !seen_ids.contains(id))
                .cloned()
                .collect();
            for row_id in gone {
                let before: Option<Record> = snapshots.get(&row_id).and_then(|v| {
                    v.as_object()
                        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                });
                let ctx = ExtractContext::new(
                    self.config.table.clone(),
                    row_id.clone(),
                    self.config.name.clone(),
                    clock.now(),
                );
                if let Some(delta) = extract_delta(before.as_ref(), None, &ctx) {
                    deltas.push(delta);
                }
                next_snapshots.remove(&row_id);
            }
        }

        debug!(
            source = %self.config.name,
            records = records.len(),
            deltas = deltas.len(),
            "Poll cycle diffed"
        );
        Ok((deltas, CdcCursor::Poll { updated_since: watermark, snapshots: next_snapshots }))
    }

    /// GET with Bearer auth; 429 honours `Retry-After` up to 3 attempts
    async fn fetch_records(&self, updated_since: &str) -> Result<Vec<Value>> {
        let mut url = self.config.endpoint.clone();
        if !updated_since.is_empty() && !self.config.full_snapshot {
            let separator = if url.contains('?') { '&' } else { '?' };
            url.push_str(&format!("{separator}updated_since={updated_since}"));
        }

        let mut attempts = 0;
        loop {
            let mut request = self.client.get(&url);
            if let Some(token) = &self.config.bearer_token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| LakeSyncError::Http(format!("poll fetch: {e}")))?;

            if response.status().as_u16() == 429 {
                let retry_after_ms = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|secs| secs * 1000)
                    .unwrap_or(1000);
                attempts += 1;
                if attempts >= MAX_FETCH_ATTEMPTS {
                    return Err(LakeSyncError::RateLimited { retry_after_ms });
                }
                warn!(attempts, retry_after_ms, "Poll rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(retry_after_ms)).await;
                continue;
            }
            if !response.status().is_success() {
                return Err(LakeSyncError::Http(format!(
                    "poll fetch HTTP {}",
                    response.status()
                )));
            }

            let body: Value = response
                .json()
                .await
                .map_err(|e| LakeSyncError::Serialization(e.to_string()))?;
            // Either a bare array or an envelope with a `data` field.
            let records = body
                .as_array()
                .cloned()
                .or_else(|| body["data"].as_array().cloned())
                .unwrap_or_default();
            return Ok(records);
        }
    }

    /// Spawn the polling loop; mirrors the CDC source lifecycle
    pub fn start(
        self,
        sink: Arc<dyn DeltaSink>,
        clock: Arc<HlcClock>,
    ) -> RunningPoller {
        let cursor = Arc::new(Mutex::new(CdcCursor::poll_start()));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let loop_cursor = cursor.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(source = %self.config.name, endpoint = %self.config.endpoint, "REST poller started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let current = loop_cursor.lock().unwrap_or_else(|e| e.into_inner()).clone();
                        match self.poll_once(&current, &clock).await {
                            Ok((deltas, next)) => {
                                let pushed = if deltas.is_empty() {
                                    Ok(Vec::new())
                                } else {
                                    sink.push(&self.config.name, deltas).await
                                };
                                match pushed {
                                    Ok(_) => {
                                        *loop_cursor.lock().unwrap_or_else(|e| e.into_inner()) = next;
                                    }
                                    Err(e) => error!(source = %self.config.name, error = %e, "Poll push failed"),
                                }
                            }
                            Err(e) => error!(source = %self.config.name, error = %e, "Poll cycle failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!(source = %self.config.name, "REST poller stopping");
                        break;
                    }
                }
            }
        });

        RunningPoller { shutdown, handle, cursor }
    }
}

/// Handle to a spawned poller
pub struct RunningPoller {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    cursor: Arc<Mutex<CdcCursor>>,
}

impl RunningPoller {
    pub fn cursor(&self) -> CdcCursor {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Poller task join failed");
        }
    }
}
