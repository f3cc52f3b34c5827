//! Generic CDC polling source
//!
//! One spawned task per source: tick, fetch, convert, push, advance cursor.
//! Errors inside a tick are logged and swallowed so the loop stays alive;
//! the cursor only advances after a successful push, which keeps delivery
//! at-least-once end to end.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use lakesync_core::{DeltaSink, Hlc, HlcClock, Result, RowDelta};

use crate::dialect::{CdcBatch, CdcCursor, CdcDialect, CdcRawChange};

/// Default tick interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Configuration of one CDC source
#[derive(Debug, Clone)]
pub struct CdcSourceConfig {
    /// Client id the source pushes under
    pub name: String,
    /// Tables to capture; `None` captures everything the dialect finds
    pub tables: Option<Vec<String>>,
    pub poll_interval_ms: u64,
}

impl CdcSourceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = Some(tables);
        self
    }

    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }
}

/// A running CDC source
pub struct CdcSource {
    dialect: Arc<dyn CdcDialect>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    cursor: Arc<Mutex<CdcCursor>>,
}

impl CdcSource {
    /// Connect the dialect, set up capture, and start the polling task
    pub async fn start(
        dialect: Arc<dyn CdcDialect>,
        sink: Arc<dyn DeltaSink>,
        clock: Arc<HlcClock>,
        config: CdcSourceConfig,
    ) -> Result<Self> {
        dialect.connect().await?;
        dialect.ensure_capture(config.tables.as_deref()).await?;

        let cursor = Arc::new(Mutex::new(dialect.default_cursor()));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let loop_dialect = dialect.clone();
        let loop_cursor = cursor.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(1)));
            // A slow cycle must not cause a burst of catch-up ticks.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(source = %config.name, interval_ms = config.poll_interval_ms, "CDC source started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) =
                            poll_once(&*loop_dialect, &*sink, &clock, &config, &loop_cursor).await
                        {
                            error!(source = %config.name, error = %e, "CDC poll cycle failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!(source = %config.name, "CDC source stopping");
                        break;
                    }
                }
            }
        });

        Ok(Self { dialect, shutdown, handle, cursor })
    }

    /// Current resume cursor
    pub fn cursor(&self) -> CdcCursor {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Stop the polling task and close the dialect
    ///
    /// An in-flight fetch runs to completion; close errors are logged only.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "CDC task join failed");
        }
        if let Err(e) = self.dialect.close().await {
            warn!(error = %e, "CDC dialect close failed");
        }
    }
}

/// One fetch→convert→push cycle; the cursor advances only on success
async fn poll_once(
    dialect: &dyn CdcDialect,
    sink: &dyn DeltaSink,
    clock: &HlcClock,
    config: &CdcSourceConfig,
    cursor: &Mutex<CdcCursor>,
) -> Result<()> {
    let current = cursor.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let CdcBatch { changes, cursor: next } = dialect.fetch_changes(&current).await?;

    let filtered: Vec<CdcRawChange> = changes
        .into_iter()
        .filter(|c| match &config.tables {
            Some(tables) => tables.iter().any(|t| t == &c.table),
            None => true,
        })
        .collect();

    if !filtered.is_empty() {
        let deltas = convert_changes(&filtered, &config.name, clock);
        let count = deltas.len();
        let acked = sink.push(&config.name, deltas).await?;
        debug!(source = %config.name, pushed = count, acked = acked.len(), "CDC batch pushed");
    }

    *cursor.lock().unwrap_or_else(|e| e.into_inner()) = next;
    Ok(())
}

/// Convert raw changes into row deltas
///
/// The batch shares one base timestamp — the upstream commit time when the
/// log carries one (replays then reproduce identical delta ids), otherwise a
/// single `HLC.now()`. Successive changes get successive counters so
/// in-batch order survives LWW.
pub fn convert_changes(
    changes: &[CdcRawChange],
    client_id: &str,
    clock: &HlcClock,
) -> Vec<RowDelta> {
    let base = match changes.iter().find_map(|c| c.captured_at_ms) {
        Some(wall) => Hlc::encode(wall, 0),
        None => clock.now(),
    };
    changes
        .iter()
        .enumerate()
        .map(|(i, change)| {
            let hlc = step_hlc(base, i as u64);
            RowDelta::new(
                change.kind.into(),
                change.table.clone(),
                change.row_id.clone(),
                client_id,
                hlc,
                change.columns.clone(),
            )
        })
        .collect()
}

/// `base` advanced by `steps` counter increments, carrying into the wall
fn step_hlc(base: Hlc, steps: u64) -> Hlc {
    let total = base.counter() as u64 + steps;
    Hlc::encode(base.wall_ms() + (total >> 16), (total & 0xFFFF) as u16)
}
