//! Fan-out adapter — synchronous primary, fire-and-forget secondaries

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use lakesync_core::{
    ColumnValue, DatabaseAdapter, Hlc, Materialisable, Result, RowDelta, TableSchema,
};

/// Writes land on the primary before returning; secondaries replicate in the
/// background with errors swallowed. Reads come from the primary only.
pub struct FanOutAdapter {
    primary: Arc<dyn DatabaseAdapter>,
    secondaries: Vec<Arc<dyn DatabaseAdapter>>,
}

impl FanOutAdapter {
    pub fn new(primary: Arc<dyn DatabaseAdapter>, secondaries: Vec<Arc<dyn DatabaseAdapter>>) -> Self {
        Self { primary, secondaries }
    }
}

#[async_trait]
impl DatabaseAdapter for FanOutAdapter {
    async fn insert_deltas(&self, deltas: &[RowDelta]) -> Result<usize> {
        let inserted = self.primary.insert_deltas(deltas).await?;
        for secondary in &self.secondaries {
            let secondary = secondary.clone();
            let batch = deltas.to_vec();
            tokio::spawn(async move {
                if let Err(e) = secondary.insert_deltas(&batch).await {
                    warn!(error = %e, "Secondary replication failed");
                }
            });
        }
        Ok(inserted)
    }

    async fn query_deltas_since(&self, since: Hlc, limit: Option<usize>) -> Result<Vec<RowDelta>> {
        self.primary.query_deltas_since(since, limit).await
    }

    async fn query_deltas_before(&self, before: Hlc) -> Result<Vec<RowDelta>> {
        self.primary.query_deltas_before(before).await
    }

    async fn get_latest_state(
        &self,
        table: &str,
        row_id: &str,
    ) -> Result<Option<HashMap<String, ColumnValue>>> {
        self.primary.get_latest_state(table, row_id).await
    }

    async fn close(&self) -> Result<()> {
        self.primary.close().await?;
        for secondary in &self.secondaries {
            secondary.close().await?;
        }
        Ok(())
    }

    fn as_materialisable(&self) -> Option<&dyn Materialisable> {
        // The fan-out is materialisable exactly when its primary is.
        self.primary.as_materialisable().map(|_| self as &dyn Materialisable)
    }
}

#[async_trait]
impl Materialisable for FanOutAdapter {
    async fn materialise(&self, deltas: &[RowDelta], schemas: &[TableSchema]) -> Result<()> {
        if let Some(primary) = self.primary.as_materialisable() {
            primary.materialise(deltas, schemas).await?;
        }
        for secondary in &self.secondaries {
            if secondary.as_materialisable().is_none() {
                continue;
            }
            let secondary = secondary.clone();
            let batch = deltas.to_vec();
            let schemas = schemas.to_vec();
            tokio::spawn(async move {
                if let Some(m) = secondary.as_materialisable() {
                    if let Err(e) = m.materialise(&batch, &schemas).await {
                        warn!(error = %e, "Secondary materialisation failed");
                    }
                }
            });
        }
        Ok(())
    }
}
