//! Applying remote deltas to a local replica
//!
//! The embedded local database is an external collaborator: LakeSync only
//! sees it through the [`LocalStore`] contract (read column states, apply a
//! batch of writes atomically) and the [`PendingQueue`] of not-yet-pushed
//! local deltas. [`apply_remote_deltas`] runs column-level LWW between the
//! two, so a newer pending local write survives an older remote one.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::delta::{DeltaOp, RowDelta};
use crate::error::{LakeSyncError, Result};
use crate::hlc::Hlc;
use crate::resolve::ColumnState;

/// One write produced by conflict resolution
#[derive(Debug, Clone, PartialEq)]
pub enum LocalWrite {
    Upsert {
        table: String,
        row_id: String,
        columns: Vec<(String, ColumnState)>,
    },
    Delete {
        table: String,
        row_id: String,
        hlc: Hlc,
    },
}

/// Key-value + tabular surface of the local embedded database
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Current column states for a row, or `None` when the row is absent
    async fn column_states(
        &self,
        table: &str,
        row_id: &str,
    ) -> Result<Option<HashMap<String, ColumnState>>>;

    /// Apply a batch of writes in one storage transaction
    async fn apply(&self, writes: Vec<LocalWrite>) -> Result<()>;
}

/// Queue of local deltas awaiting push to the gateway
#[async_trait]
pub trait PendingQueue: Send + Sync {
    async fn pending_for(&self, table: &str, row_id: &str) -> Result<Vec<RowDelta>>;

    /// Mark a pending delta as superseded; it will never be pushed
    async fn acknowledge(&self, delta_id: &str) -> Result<()>;
}

/// Apply a batch of remote deltas against the local replica
///
/// Per column the remote write is applied only where it beats the local
/// state under `(hlc, client_id)` LWW; losing remote columns are dropped.
/// Pending local deltas whose every column is superseded by an applied
/// remote write are acknowledged. All resulting writes go to the store as
/// one atomic batch. Returns the number of remote deltas that changed
/// local state.
pub async fn apply_remote_deltas(
    store: &dyn LocalStore,
    pending: &dyn PendingQueue,
    remote_deltas: &[RowDelta],
) -> Result<usize> {
    let mut writes = Vec::new();
    let mut acked = Vec::new();
    let mut applied = 0usize;

    for delta in remote_deltas {
        let states = store.column_states(&delta.table, &delta.row_id).await?;
        let row_pending = pending.pending_for(&delta.table, &delta.row_id).await?;

        match delta.op {
            DeltaOp::Delete => {
                // A DELETE wins when it beats every surviving column write.
                let beaten = states.as_ref().map_or(false, |cols| {
                    cols.values().all(|s| s.loses_to(delta.hlc, &delta.client_id))
                });
                if beaten {
                    writes.push(LocalWrite::Delete {
                        table: delta.table.clone(),
                        row_id: delta.row_id.clone(),
                        hlc: delta.hlc,
                    });
                    applied += 1;
                    for p in &row_pending {
                        if p.hlc < delta.hlc {
                            acked.push(p.delta_id.clone());
                        }
                    }
                } else {
                    debug!(
                        table = %delta.table,
                        row_id = %delta.row_id,
                        "Remote DELETE lost to newer local writes"
                    );
                }
            }
            DeltaOp::Insert | DeltaOp::Update => {
                let mut winning = Vec::new();
                let mut won_columns = Vec::new();
                for col in &delta.columns {
                    let wins = match states.as_ref().and_then(|s| s.get(&col.column)) {
                        Some(current) => current.loses_to(delta.hlc, &delta.client_id),
                        None => true,
                    };
                    if wins {
                        won_columns.push(col.column.clone());
                        winning.push((
                            col.column.clone(),
                            ColumnState::new(col.value.clone(), delta.hlc, delta.client_id.clone()),
                        ));
                    }
                }
                if winning.is_empty() {
                    debug!(
                        table = %delta.table,
                        row_id = %delta.row_id,
                        delta_id = %delta.delta_id,
                        "Remote delta dropped, all columns lost LWW"
                    );
                    continue;
                }
                writes.push(LocalWrite::Upsert {
                    table: delta.table.clone(),
                    row_id: delta.row_id.clone(),
                    columns: winning,
                });
                applied += 1;

                // A pending local delta is superseded when every column it
                // touches was just overwritten by a newer remote write.
                for p in &row_pending {
                    let superseded = !p.columns.is_empty()
                        && p.columns.iter().all(|pc| {
                            won_columns.contains(&pc.column)
                                && ColumnState::new(pc.value.clone(), p.hlc, p.client_id.clone())
                                    .loses_to(delta.hlc, &delta.client_id)
                        });
                    if superseded {
                        acked.push(p.delta_id.clone());
                    }
                }
            }
        }
    }

    if !writes.is_empty() {
        store
            .apply(writes)
            .await
            .map_err(|e| LakeSyncError::ApplyError(e.to_string()))?;
    }
    for delta_id in acked {
        pending.acknowledge(&delta_id).await?;
    }
    Ok(applied)
}

// ─── In-memory implementations ───

/// HashMap-backed [`LocalStore`] for tests and the reference client flow
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    rows: Mutex<HashMap<(String, String), HashMap<String, ColumnState>>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain values of a row, for assertions
    pub fn row_values(&self, table: &str, row_id: &str) -> Option<HashMap<String, crate::delta::ColumnValue>> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.get(&(table.to_string(), row_id.to_string())).map(|cols| {
            cols.iter().map(|(k, s)| (k.clone(), s.value.clone())).collect()
        })
    }

    /// Seed a row directly, bypassing conflict resolution
    pub fn seed(&self, table: &str, row_id: &str, columns: Vec<(String, ColumnState)>) {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.entry((table.to_string(), row_id.to_string()))
            .or_default()
            .extend(columns);
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn column_states(
        &self,
        table: &str,
        row_id: &str,
    ) -> Result<Option<HashMap<String, ColumnState>>> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.get(&(table.to_string(), row_id.to_string())).cloned())
    }

    async fn apply(&self, writes: Vec<LocalWrite>) -> Result<()> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        for write in writes {
            match write {
                LocalWrite::Upsert { table, row_id, columns } => {
                    rows.entry((table, row_id)).or_default().extend(columns);
                }
                LocalWrite::Delete { table, row_id, .. } => {
                    rows.remove(&(table, row_id));
                }
            }
        }
        Ok(())
    }
}

/// In-memory [`PendingQueue`]
#[derive(Debug, Default)]
pub struct MemoryPendingQueue {
    pending: Mutex<Vec<RowDelta>>,
}

impl MemoryPendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, delta: RowDelta) {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).push(delta);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PendingQueue for MemoryPendingQueue {
    async fn pending_for(&self, table: &str, row_id: &str) -> Result<Vec<RowDelta>> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        Ok(pending
            .iter()
            .filter(|d| d.table == table && d.row_id == row_id)
            .cloned()
            .collect())
    }

    async fn acknowledge(&self, delta_id: &str) -> Result<()> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|d| d.delta_id != delta_id);
        Ok(())
    }
}
