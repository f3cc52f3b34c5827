//! In-memory deltas-store adapter
//!
//! Backs routing tests, migration dry runs, and any flow that needs a
//! warehouse-shaped sink without a warehouse.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use lakesync_core::{
    project_row_state, sort_for_replay, ColumnValue, DatabaseAdapter, Hlc, Materialisable, Result,
    RowDelta, TableSchema,
};

type MaterialisedTables = HashMap<String, HashMap<String, HashMap<String, ColumnValue>>>;

/// HashMap-backed [`DatabaseAdapter`] + [`Materialisable`]
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    deltas: Mutex<Vec<RowDelta>>,
    seen: Mutex<HashSet<String>>,
    materialised: Mutex<MaterialisedTables>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delta_count(&self) -> usize {
        self.deltas.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Materialised destination row, for assertions
    pub fn materialised_row(
        &self,
        table: &str,
        row_id: &str,
    ) -> Option<HashMap<String, ColumnValue>> {
        let tables = self.materialised.lock().unwrap_or_else(|e| e.into_inner());
        tables.get(table).and_then(|rows| rows.get(row_id)).cloned()
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryAdapter {
    async fn insert_deltas(&self, deltas: &[RowDelta]) -> Result<usize> {
        let mut stored = self.deltas.lock().unwrap_or_else(|e| e.into_inner());
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let mut inserted = 0usize;
        for delta in deltas {
            if seen.insert(delta.delta_id.clone()) {
                stored.push(delta.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn query_deltas_since(&self, since: Hlc, limit: Option<usize>) -> Result<Vec<RowDelta>> {
        let stored = self.deltas.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<RowDelta> =
            stored.iter().filter(|d| d.hlc > since).cloned().collect();
        sort_for_replay(&mut matching);
        if let Some(limit) = limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn query_deltas_before(&self, before: Hlc) -> Result<Vec<RowDelta>> {
        let stored = self.deltas.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<RowDelta> =
            stored.iter().filter(|d| d.hlc < before).cloned().collect();
        sort_for_replay(&mut matching);
        Ok(matching)
    }

    async fn get_latest_state(
        &self,
        table: &str,
        row_id: &str,
    ) -> Result<Option<HashMap<String, ColumnValue>>> {
        let stored = self.deltas.lock().unwrap_or_else(|e| e.into_inner());
        let mut history: Vec<RowDelta> = stored
            .iter()
            .filter(|d| d.table == table && d.row_id == row_id)
            .cloned()
            .collect();
        drop(stored);
        sort_for_replay(&mut history);
        Ok(project_row_state(&history))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn as_materialisable(&self) -> Option<&dyn Materialisable> {
        Some(self)
    }
}

#[async_trait]
impl Materialisable for MemoryAdapter {
    async fn materialise(&self, deltas: &[RowDelta], schemas: &[TableSchema]) -> Result<()> {
        let schemas_by_source: HashMap<&str, &TableSchema> =
            schemas.iter().map(|s| (s.source_name(), s)).collect();

        let mut by_key: HashMap<(String, String), Vec<RowDelta>> = HashMap::new();
        {
            let stored = self.deltas.lock().unwrap_or_else(|e| e.into_inner());
            for delta in stored.iter().chain(deltas.iter()) {
                by_key
                    .entry((delta.table.clone(), delta.row_id.clone()))
                    .or_default()
                    .push(delta.clone());
            }
        }

        let mut tables = self.materialised.lock().unwrap_or_else(|e| e.into_inner());
        for ((source_table, row_id), mut history) in by_key {
            let Some(schema) = schemas_by_source.get(source_table.as_str()) else {
                continue;
            };
            // Duplicates between the store and the batch collapse by delta_id.
            history.sort_by(|a, b| a.delta_id.cmp(&b.delta_id));
            history.dedup_by(|a, b| a.delta_id == b.delta_id);
            sort_for_replay(&mut history);

            let rows = tables.entry(schema.table.clone()).or_default();
            match project_row_state(&history) {
                Some(state) => {
                    rows.insert(row_id, state);
                }
                None => {
                    rows.remove(&row_id);
                }
            }
        }
        debug!(tables = tables.len(), "Memory adapter materialised");
        Ok(())
    }
}
