//! SyncGateway — the push/pull/flush protocol over the shared buffer
//!
//! Many producers push concurrently; the buffer (active generation plus an
//! optional flushing snapshot) is one mutex-guarded critical region. Flushes
//! are serialised and non-blocking for pushers: the buffer moves into a
//! flushing snapshot, new pushes land in a fresh generation, and a failed
//! object write reinserts the snapshot at the head of the log so nothing is
//! lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lakesync_core::{
    compute_delta_id, verify_token, DeltaSink, Hlc, HlcClock, LakeAdapter, LakeSyncError,
    Materialisable, Result, RowDelta,
};
use lakesync_lake::write_deltas_to_parquet;

use crate::buffer::{BufferSnapshot, BufferStats, GatewayBuffer};
use crate::config::{FlushFormat, GatewayConfig};

// ─── Protocol types ───

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub client_id: String,
    pub deltas: Vec<RowDelta>,
    pub last_seen_hlc: Hlc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub acked_ids: Vec<String>,
    pub server_hlc: Hlc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub client_id: String,
    pub since_hlc: Hlc,
    pub max_deltas: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub deltas: Vec<RowDelta>,
    pub server_hlc: Hlc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub written_bytes: usize,
    pub deltas_flushed: usize,
}

/// JSON envelope of a flushed batch
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlushEnvelope {
    gateway_id: String,
    server_hlc: Hlc,
    deltas: Vec<RowDelta>,
}

// ─── Gateway ───

struct BufferState {
    active: GatewayBuffer,
    flushing: Option<BufferSnapshot>,
}

/// The sync gateway
pub struct SyncGateway {
    config: GatewayConfig,
    clock: HlcClock,
    state: Mutex<BufferState>,
    lake: Option<Arc<dyn LakeAdapter>>,
    flush_serial: tokio::sync::Mutex<()>,
    flush_tx: mpsc::Sender<()>,
    /// Wall ms of the last successful flush; 0 = never
    last_sync_ms: AtomicU64,
}

/// Builder for a running gateway
pub struct GatewayBuilder {
    config: GatewayConfig,
    clock: Option<HlcClock>,
    lake: Option<Arc<dyn LakeAdapter>>,
}

impl GatewayBuilder {
    pub fn with_clock(mut self, clock: HlcClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_lake(mut self, lake: Arc<dyn LakeAdapter>) -> Self {
        self.lake = Some(lake);
        self
    }

    /// Validate config, spawn the background flusher, and return the gateway
    pub fn start(self) -> Result<Arc<SyncGateway>> {
        self.config.validate()?;
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let gateway = Arc::new(SyncGateway {
            clock: self.clock.unwrap_or_else(HlcClock::system),
            state: Mutex::new(BufferState {
                active: GatewayBuffer::new(self.config.max_buffer_bytes),
                flushing: None,
            }),
            lake: self.lake,
            flush_serial: tokio::sync::Mutex::new(()),
            flush_tx,
            last_sync_ms: AtomicU64::new(0),
            config: self.config,
        });
        SyncGateway::spawn_flusher(Arc::downgrade(&gateway), flush_rx);
        info!(gateway_id = %gateway.config.gateway_id, "Sync gateway started");
        Ok(gateway)
    }
}

impl SyncGateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder { config, clock: None, lake: None }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Background task draining flush triggers; holds only a weak reference
    /// so the gateway can be dropped
    fn spawn_flusher(gateway: Weak<SyncGateway>, mut rx: mpsc::Receiver<()>) {
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let Some(gateway) = gateway.upgrade() else {
                    break;
                };
                if let Err(e) = gateway.flush().await {
                    warn!(error = %e, "Triggered flush failed");
                }
            }
        });
    }

    fn authorize(&self, token: &str) -> Result<String> {
        verify_token(&self.config.jwt_secret, token, &self.config.gateway_id)
    }

    /// Accept a batch of deltas from an authenticated client
    pub async fn handle_push(&self, token: &str, request: PushRequest) -> Result<PushResponse> {
        let client = self.authorize(token)?;
        debug!(client = %client, deltas = request.deltas.len(), "Push received");
        // The caller's cursor is a peer observation of our own clock; merge
        // it so the returned serverHlc always moves forward from it.
        if request.last_seen_hlc > Hlc::ZERO {
            if let Err(e) = self.clock.update(request.last_seen_hlc) {
                warn!(client = %client, error = %e, "lastSeenHlc ignored");
            }
        }
        let acked = self.accept_deltas(&request.deltas)?;
        Ok(PushResponse { acked_ids: acked, server_hlc: self.clock.now() })
    }

    /// The unauthenticated in-process push path (CDC sources, pollers)
    fn accept_deltas(&self, deltas: &[RowDelta]) -> Result<Vec<String>> {
        let mut acked = Vec::with_capacity(deltas.len());
        let now_ms = self.clock.wall_ms();
        let mut trigger = false;
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            for delta in deltas {
                // Merge the producer's clock; a drifted delta is dropped, not fatal.
                if let Err(e) = self.clock.update(delta.hlc) {
                    warn!(delta_id = %delta.delta_id, error = %e, "Delta dropped");
                    continue;
                }
                // Content hash must match: a delta that lies about its id
                // would poison idempotence downstream.
                let expected = compute_delta_id(
                    &delta.client_id,
                    delta.hlc,
                    &delta.table,
                    &delta.row_id,
                    &delta.columns,
                );
                if expected != delta.delta_id {
                    warn!(delta_id = %delta.delta_id, "Malformed delta dropped (id mismatch)");
                    continue;
                }

                state.active.append(delta.clone(), now_ms)?;
                acked.push(delta.delta_id.clone());
            }

            let stats = state.active.stats(now_ms);
            if stats.size_bytes >= self.config.max_buffer_bytes
                || (stats.log_size > 0 && stats.age_ms >= self.config.max_buffer_age_ms)
            {
                trigger = true;
            }
        }
        if trigger {
            // Non-blocking: a full channel means a flush is already queued.
            let _ = self.flush_tx.try_send(());
        }
        Ok(acked)
    }

    /// Serve deltas newer than the caller's cursor
    pub fn handle_pull(&self, token: &str, request: PullRequest) -> Result<PullResponse> {
        let client = self.authorize(token)?;
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // Merged view: the flushing snapshot still counts until its object
        // write succeeds.
        let mut deltas: Vec<RowDelta> = state
            .flushing
            .iter()
            .flat_map(|s| s.entries.iter().map(|e| e.delta.clone()))
            .filter(|d| d.hlc > request.since_hlc)
            .collect();
        deltas.extend(state.active.deltas_since(request.since_hlc, usize::MAX));
        drop(state);

        lakesync_core::sort_for_replay(&mut deltas);
        deltas.truncate(request.max_deltas);

        debug!(client = %client, returned = deltas.len(), "Pull served");
        Ok(PullResponse { deltas, server_hlc: self.clock.now() })
    }

    /// Flush the buffer to the configured lake adapter
    pub async fn flush(&self) -> Result<FlushReport> {
        let _serial = self.flush_serial.lock().await;

        let Some(lake) = self.lake.as_ref() else {
            return Err(LakeSyncError::NoAdapter);
        };

        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.active.is_empty() {
                return Ok(FlushReport { written_bytes: 0, deltas_flushed: 0 });
            }
            let snapshot = state.active.take();
            state.flushing = Some(snapshot.clone());
            snapshot
        };

        let deltas = snapshot.deltas();
        let count = deltas.len();
        let server_hlc = self.clock.now();

        let encoded: Result<(Vec<u8>, &str)> = match self.config.flush_format {
            FlushFormat::Json => serde_json::to_vec(&FlushEnvelope {
                gateway_id: self.config.gateway_id.clone(),
                server_hlc,
                deltas: deltas.clone(),
            })
            .map(|bytes| (bytes, "json"))
            .map_err(|e| LakeSyncError::Serialization(e.to_string())),
            FlushFormat::Parquet => {
                write_deltas_to_parquet(&deltas).map(|bytes| (bytes, "parquet"))
            }
        };

        let result = match encoded {
            Ok((bytes, ext)) => {
                let key = format!(
                    "deltas/{}/{}-{}.{ext}",
                    self.config.gateway_id,
                    server_hlc.wall_ms(),
                    Uuid::new_v4()
                );
                let written = bytes.len();
                lake.put_object(&key, bytes).await.map(|_| (key, written))
            }
            Err(e) => Err(e),
        };

        match result {
            Ok((key, written_bytes)) => {
                {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.flushing = None;
                }
                self.last_sync_ms.store(self.clock.wall_ms(), Ordering::Relaxed);
                info!(key = %key, deltas = count, bytes = written_bytes, "Flush complete");

                // Materialisation rides behind the object write; its errors
                // never roll the flush back.
                if let Some(materialisable) = lake.as_materialisable() {
                    if let Err(e) =
                        materialisable.materialise(&deltas, &self.config.table_schemas).await
                    {
                        error!(error = %e, "Post-flush materialisation failed");
                    }
                }
                Ok(FlushReport { written_bytes, deltas_flushed: count })
            }
            Err(e) => {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.flushing = None;
                state.active.restore(snapshot);
                warn!(error = %e, deltas = count, "Flush failed, buffer restored");
                Err(LakeSyncError::FlushFailed(e.to_string()))
            }
        }
    }

    /// Live buffer statistics (active generation)
    pub fn buffer_stats(&self) -> BufferStats {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.active.stats(self.clock.wall_ms())
    }

    /// Wall ms of the last successful flush
    pub fn last_sync_time(&self) -> Option<u64> {
        match self.last_sync_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }
}

#[async_trait]
impl DeltaSink for SyncGateway {
    async fn push(&self, client_id: &str, deltas: Vec<RowDelta>) -> Result<Vec<String>> {
        debug!(client = client_id, deltas = deltas.len(), "In-process push");
        self.accept_deltas(&deltas)
    }
}
