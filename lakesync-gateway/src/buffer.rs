//! Gateway buffer — append log plus a column-level LWW index
//!
//! Two aligned structures: the `log` holds exactly the accepted-not-yet-
//! flushed deltas in arrival order, and the `index` holds the per-row,
//! per-column LWW projection with tombstone bookkeeping. Byte and age
//! accounting drive the gateway's flush triggers; appends beyond twice the
//! soft byte limit are refused as backpressure.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use lakesync_core::{ColumnValue, DeltaOp, Hlc, LakeSyncError, Result, RowDelta};

/// Winning write for one column in the index
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnEntry {
    pub value: ColumnValue,
    pub hlc: Hlc,
    pub client_id: String,
}

/// Index entry for one `(table, row_id)`
#[derive(Debug, Clone, Default)]
pub struct RowEntry {
    pub per_column: HashMap<String, ColumnEntry>,
    pub tombstoned: bool,
    pub tombstone_hlc: Option<Hlc>,
    pub last_hlc: Hlc,
}

/// Live buffer statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    pub log_size: usize,
    pub index_size: usize,
    pub size_bytes: usize,
    pub age_ms: u64,
}

/// One accepted delta with its insertion wall time
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub delta: RowDelta,
    pub inserted_wall_ms: u64,
}

/// Snapshot moved out of the buffer for a flush
#[derive(Debug, Clone, Default)]
pub struct BufferSnapshot {
    pub entries: Vec<LogEntry>,
    pub size_bytes: usize,
}

impl BufferSnapshot {
    pub fn deltas(&self) -> Vec<RowDelta> {
        self.entries.iter().map(|e| e.delta.clone()).collect()
    }
}

/// Outcome of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// `delta_id` already accepted; the append was skipped
    Duplicate,
}

/// In-memory gateway buffer
#[derive(Debug)]
pub struct GatewayBuffer {
    log: Vec<LogEntry>,
    seen: HashSet<String>,
    index: HashMap<(String, String), RowEntry>,
    size_bytes: usize,
    max_buffer_bytes: usize,
}

impl GatewayBuffer {
    pub fn new(max_buffer_bytes: usize) -> Self {
        Self {
            log: Vec::new(),
            seen: HashSet::new(),
            index: HashMap::new(),
            size_bytes: 0,
            max_buffer_bytes,
        }
    }

    /// Accept one delta; duplicates are skipped, overflow is refused
    pub fn append(&mut self, delta: RowDelta, now_ms: u64) -> Result<AppendOutcome> {
        if self.seen.contains(&delta.delta_id) {
            return Ok(AppendOutcome::Duplicate);
        }
        let estimate = delta.estimate_bytes();
        if self.size_bytes + estimate > 2 * self.max_buffer_bytes {
            return Err(LakeSyncError::BufferFull {
                size_bytes: self.size_bytes,
                limit_bytes: 2 * self.max_buffer_bytes,
            });
        }

        self.apply_to_index(&delta);
        self.seen.insert(delta.delta_id.clone());
        self.log.push(LogEntry { delta, inserted_wall_ms: now_ms });
        self.size_bytes += estimate;
        Ok(AppendOutcome::Appended)
    }

    fn apply_to_index(&mut self, delta: &RowDelta) {
        let key = (delta.table.clone(), delta.row_id.clone());
        let entry = self.index.entry(key).or_default();

        match delta.op {
            DeltaOp::Delete => {
                if delta.hlc > entry.last_hlc || entry.per_column.is_empty() {
                    entry.tombstoned = true;
                    entry.tombstone_hlc = Some(delta.hlc);
                    entry.per_column.clear();
                }
            }
            DeltaOp::Insert | DeltaOp::Update => {
                for col in &delta.columns {
                    let incoming = ColumnEntry {
                        value: col.value.clone(),
                        hlc: delta.hlc,
                        client_id: delta.client_id.clone(),
                    };
                    match entry.per_column.get(&col.column) {
                        Some(current)
                            if !(incoming.hlc > current.hlc
                                || (incoming.hlc == current.hlc
                                    && incoming.client_id > current.client_id)) => {}
                        _ => {
                            entry.per_column.insert(col.column.clone(), incoming);
                        }
                    }
                }
                // A write after the tombstone resurrects the row.
                if entry.tombstoned && entry.tombstone_hlc.map_or(true, |t| delta.hlc > t) {
                    entry.tombstoned = false;
                    entry.tombstone_hlc = None;
                }
            }
        }
        entry.last_hlc = entry.last_hlc.max(delta.hlc);
    }

    /// Index entry for assertions and projections
    pub fn row_entry(&self, table: &str, row_id: &str) -> Option<&RowEntry> {
        self.index.get(&(table.to_string(), row_id.to_string()))
    }

    pub fn stats(&self, now_ms: u64) -> BufferStats {
        let age_ms = self
            .log
            .first()
            .map(|e| now_ms.saturating_sub(e.inserted_wall_ms))
            .unwrap_or(0);
        BufferStats {
            log_size: self.log.len(),
            index_size: self.index.len(),
            size_bytes: self.size_bytes,
            age_ms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn log_size(&self) -> usize {
        self.log.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Deltas with `hlc > since`, ascending `(hlc, client_id)`, capped
    pub fn deltas_since(&self, since: Hlc, max: usize) -> Vec<RowDelta> {
        let mut matching: Vec<RowDelta> = self
            .log
            .iter()
            .filter(|e| e.delta.hlc > since)
            .map(|e| e.delta.clone())
            .collect();
        lakesync_core::sort_for_replay(&mut matching);
        matching.truncate(max);
        matching
    }

    /// Move the whole buffer out for a flush, leaving it empty
    pub fn take(&mut self) -> BufferSnapshot {
        let snapshot = BufferSnapshot {
            entries: std::mem::take(&mut self.log),
            size_bytes: self.size_bytes,
        };
        self.seen.clear();
        self.index.clear();
        self.size_bytes = 0;
        snapshot
    }

    /// Reinsert a failed flush at the head of the log, index re-applied
    pub fn restore(&mut self, snapshot: BufferSnapshot) {
        let newer = std::mem::take(&mut self.log);
        self.seen.clear();
        self.index.clear();
        self.size_bytes = 0;

        for entry in snapshot.entries.into_iter().chain(newer) {
            if !self.seen.insert(entry.delta.delta_id.clone()) {
                continue;
            }
            self.size_bytes += entry.delta.estimate_bytes();
            self.apply_to_index(&entry.delta);
            self.log.push(entry);
        }
    }
}
