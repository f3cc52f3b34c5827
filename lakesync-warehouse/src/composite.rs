//! Composite adapter — route tables to different destinations

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use lakesync_core::{
    sort_for_replay, ColumnValue, DatabaseAdapter, Hlc, LakeSyncError, Result, RowDelta,
};

/// Routes each table to exactly one underlying adapter
pub struct CompositeAdapter {
    routes: HashMap<String, Arc<dyn DatabaseAdapter>>,
}

impl std::fmt::Debug for CompositeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeAdapter")
            .field("tables", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CompositeAdapter {
    /// Build from `(table, adapter)` routes; overlapping tables are rejected
    pub fn new(routes: Vec<(String, Arc<dyn DatabaseAdapter>)>) -> Result<Self> {
        let mut map: HashMap<String, Arc<dyn DatabaseAdapter>> = HashMap::new();
        for (table, adapter) in routes {
            if map.contains_key(&table) {
                return Err(LakeSyncError::Config(format!(
                    "overlapping route for table '{table}'"
                )));
            }
            map.insert(table, adapter);
        }
        Ok(Self { routes: map })
    }

    fn route(&self, table: &str) -> Result<&Arc<dyn DatabaseAdapter>> {
        self.routes
            .get(table)
            .ok_or_else(|| LakeSyncError::AdapterError(format!("no route for table '{table}'")))
    }

    /// Each underlying adapter exactly once
    fn distinct_adapters(&self) -> Vec<&Arc<dyn DatabaseAdapter>> {
        let mut out: Vec<&Arc<dyn DatabaseAdapter>> = Vec::new();
        for adapter in self.routes.values() {
            if !out.iter().any(|seen| Arc::ptr_eq(seen, adapter)) {
                out.push(adapter);
            }
        }
        out
    }
}

#[async_trait]
impl DatabaseAdapter for CompositeAdapter {
    async fn insert_deltas(&self, deltas: &[RowDelta]) -> Result<usize> {
        let mut grouped: HashMap<&str, Vec<RowDelta>> = HashMap::new();
        for delta in deltas {
            grouped.entry(delta.table.as_str()).or_default().push(delta.clone());
        }

        let mut inserted = 0usize;
        let mut first_error = None;
        for (table, group) in grouped {
            let result = match self.route(table) {
                Ok(adapter) => adapter.insert_deltas(&group).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(count) => inserted += count,
                Err(e) => {
                    debug!(table, error = %e, "Composite insert failed for group");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(inserted),
        }
    }

    async fn query_deltas_since(&self, since: Hlc, limit: Option<usize>) -> Result<Vec<RowDelta>> {
        let mut merged = Vec::new();
        let mut seen = HashSet::new();
        for adapter in self.distinct_adapters() {
            for delta in adapter.query_deltas_since(since, limit).await? {
                if seen.insert(delta.delta_id.clone()) {
                    merged.push(delta);
                }
            }
        }
        sort_for_replay(&mut merged);
        if let Some(limit) = limit {
            merged.truncate(limit);
        }
        Ok(merged)
    }

    async fn query_deltas_before(&self, before: Hlc) -> Result<Vec<RowDelta>> {
        let mut merged = Vec::new();
        let mut seen = HashSet::new();
        for adapter in self.distinct_adapters() {
            for delta in adapter.query_deltas_before(before).await? {
                if seen.insert(delta.delta_id.clone()) {
                    merged.push(delta);
                }
            }
        }
        sort_for_replay(&mut merged);
        Ok(merged)
    }

    async fn get_latest_state(
        &self,
        table: &str,
        row_id: &str,
    ) -> Result<Option<HashMap<String, ColumnValue>>> {
        self.route(table)?.get_latest_state(table, row_id).await
    }

    async fn close(&self) -> Result<()> {
        for adapter in self.distinct_adapters() {
            adapter.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use lakesync_core::{ColumnDelta, DeltaOp};
    use serde_json::json;

    fn delta(table: &str, hlc: u64) -> RowDelta {
        RowDelta::new(
            DeltaOp::Insert,
            table,
            "1",
            "c",
            Hlc::encode(hlc, 0),
            vec![ColumnDelta::new("a", json!(1))],
        )
    }

    #[test]
    fn test_overlapping_routes_rejected() {
        let a: Arc<dyn DatabaseAdapter> = Arc::new(MemoryAdapter::new());
        let err = CompositeAdapter::new(vec![
            ("t".to_string(), a.clone()),
            ("t".to_string(), a),
        ])
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_insert_routes_by_table() {
        let a = Arc::new(MemoryAdapter::new());
        let b = Arc::new(MemoryAdapter::new());
        let composite = CompositeAdapter::new(vec![
            ("ta".to_string(), a.clone() as Arc<dyn DatabaseAdapter>),
            ("tb".to_string(), b.clone() as Arc<dyn DatabaseAdapter>),
        ])
        .unwrap();

        composite.insert_deltas(&[delta("ta", 100), delta("tb", 200)]).await.unwrap();
        assert_eq!(a.delta_count(), 1);
        assert_eq!(b.delta_count(), 1);
    }

    #[tokio::test]
    async fn test_unrouted_table_is_first_error() {
        let a = Arc::new(MemoryAdapter::new());
        let composite = CompositeAdapter::new(vec![(
            "ta".to_string(),
            a.clone() as Arc<dyn DatabaseAdapter>,
        )])
        .unwrap();
        let err = composite.insert_deltas(&[delta("tx", 100)]).await.unwrap_err();
        assert_eq!(err.code(), "ADAPTER_ERROR");
    }

    #[tokio::test]
    async fn test_query_merges_sorted() {
        let a = Arc::new(MemoryAdapter::new());
        let b = Arc::new(MemoryAdapter::new());
        a.insert_deltas(&[delta("ta", 300)]).await.unwrap();
        b.insert_deltas(&[delta("tb", 100)]).await.unwrap();
        let composite = CompositeAdapter::new(vec![
            ("ta".to_string(), a as Arc<dyn DatabaseAdapter>),
            ("tb".to_string(), b as Arc<dyn DatabaseAdapter>),
        ])
        .unwrap();

        let got = composite.query_deltas_since(Hlc::ZERO, None).await.unwrap();
        let walls: Vec<u64> = got.iter().map(|d| d.hlc.wall_ms()).collect();
        assert_eq!(walls, vec![100, 300]);
    }

    #[tokio::test]
    async fn test_shared_adapter_closed_once() {
        // Same instance routed for two tables: dedup keeps close() from
        // double-visiting; the memory adapter tolerates it either way, so
        // the assertion here is simply that close succeeds.
        let shared = Arc::new(MemoryAdapter::new());
        let composite = CompositeAdapter::new(vec![
            ("ta".to_string(), shared.clone() as Arc<dyn DatabaseAdapter>),
            ("tb".to_string(), shared as Arc<dyn DatabaseAdapter>),
        ])
        .unwrap();
        assert_eq!(composite.distinct_adapters().len(), 1);
        composite.close().await.unwrap();
    }
}
