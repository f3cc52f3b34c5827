//! Warehouse deltas-store adapter
//!
//! One `lakesync_deltas` table per warehouse holds the full delta stream;
//! inserts are idempotent by `delta_id`, reads come back in HLC order. The
//! adapter is also [`Materialisable`]: it projects the stream into
//! destination tables through the dialect's upsert syntax.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use lakesync_core::{
    project_row_state, sort_for_replay, ColumnDelta, ColumnValue, DatabaseAdapter, DeltaOp, Hlc,
    LakeSyncError, Materialisable, Result, RowDelta, SqlExecutor, SqlRow, SqlValue, TableSchema,
};

use crate::dialect::SqlDialect;
use crate::materialise::materialise_sql;

/// SQL warehouse adapter, generic over dialect and connection
pub struct SqlAdapter {
    executor: Arc<dyn SqlExecutor>,
    dialect: Arc<dyn SqlDialect>,
}

impl SqlAdapter {
    /// Connect and ensure the deltas table and its indexes exist
    pub async fn connect(
        executor: Arc<dyn SqlExecutor>,
        dialect: Arc<dyn SqlDialect>,
    ) -> Result<Self> {
        for stmt in dialect.create_deltas_table_sql() {
            executor.execute(&stmt, &[]).await?;
        }
        info!(dialect = dialect.name(), "Deltas table ready");
        Ok(Self { executor, dialect })
    }

    pub fn executor(&self) -> &Arc<dyn SqlExecutor> {
        &self.executor
    }

    pub fn dialect(&self) -> &Arc<dyn SqlDialect> {
        &self.dialect
    }

    /// Parameters for the idempotent delta insert, in dialect column order
    fn delta_params(&self, delta: &RowDelta) -> Vec<SqlValue> {
        let columns_json = Value::Array(
            delta
                .columns
                .iter()
                .map(|c| serde_json::json!({"column": c.column, "value": c.value.to_json()}))
                .collect(),
        );
        vec![
            SqlValue::Text(delta.delta_id.clone()),
            SqlValue::Text(delta.table.clone()),
            SqlValue::Text(delta.row_id.clone()),
            self.dialect.json_param(&columns_json),
            SqlValue::Int(delta.hlc.as_u64() as i64),
            SqlValue::Text(delta.client_id.clone()),
            SqlValue::Text(delta.op.as_str().to_string()),
        ]
    }

    /// History of a set of rows in one table, ascending by HLC
    pub(crate) async fn query_history(
        &self,
        table: &str,
        row_ids: &[String],
    ) -> Result<Vec<RowDelta>> {
        if row_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = self.dialect.select_history_sql(row_ids.len());
        let mut params = vec![SqlValue::Text(table.to_string())];
        params.extend(row_ids.iter().map(|id| SqlValue::Text(id.clone())));
        let rows = self.executor.query(&sql, &params).await?;
        rows.iter().map(parse_delta_row).collect()
    }
}

/// Decode one `lakesync_deltas` row into a [`RowDelta`]
pub(crate) fn parse_delta_row(row: &SqlRow) -> Result<RowDelta> {
    let columns_value: Value = match row.get("columns") {
        Some(SqlValue::Json(v)) => v.clone(),
        Some(SqlValue::Text(s)) => serde_json::from_str(s)?,
        other => {
            return Err(LakeSyncError::Sql(format!(
                "unexpected columns cell: {other:?}"
            )))
        }
    };
    let columns = columns_value
        .as_array()
        .ok_or_else(|| LakeSyncError::Sql("columns cell is not a JSON array".into()))?
        .iter()
        .map(|entry| {
            let column = entry["column"]
                .as_str()
                .ok_or_else(|| LakeSyncError::Sql("column entry missing name".into()))?
                .to_string();
            Ok(ColumnDelta::new(column, entry["value"].clone()))
        })
        .collect::<Result<Vec<_>>>()?;

    let op_str = row.require_str("op")?;
    let op = DeltaOp::parse(op_str)
        .ok_or_else(|| LakeSyncError::Sql(format!("unknown op '{op_str}'")))?;

    Ok(RowDelta {
        delta_id: row.require_str("delta_id")?.to_string(),
        op,
        table: row.require_str("table")?.to_string(),
        row_id: row.require_str("row_id")?.to_string(),
        client_id: row.require_str("client_id")?.to_string(),
        hlc: Hlc::from_u64(row.require_i64("hlc")? as u64),
        columns,
    })
}

#[async_trait]
impl DatabaseAdapter for SqlAdapter {
    async fn insert_deltas(&self, deltas: &[RowDelta]) -> Result<usize> {
        let sql = self.dialect.insert_delta_sql();
        let mut inserted = 0usize;
        for delta in deltas {
            let affected = self.executor.execute(&sql, &self.delta_params(delta)).await?;
            inserted += affected as usize;
        }
        debug!(batch = deltas.len(), inserted, "Deltas inserted");
        Ok(inserted)
    }

    async fn query_deltas_since(&self, since: Hlc, limit: Option<usize>) -> Result<Vec<RowDelta>> {
        let sql = self.dialect.select_deltas_since_sql(limit.is_some());
        let mut params = vec![SqlValue::Int(since.as_u64() as i64)];
        if let Some(limit) = limit {
            params.push(SqlValue::Int(limit as i64));
        }
        let rows = self.executor.query(&sql, &params).await?;
        rows.iter().map(parse_delta_row).collect()
    }

    async fn query_deltas_before(&self, before: Hlc) -> Result<Vec<RowDelta>> {
        let sql = self.dialect.select_deltas_before_sql();
        let rows = self
            .executor
            .query(&sql, &[SqlValue::Int(before.as_u64() as i64)])
            .await?;
        rows.iter().map(parse_delta_row).collect()
    }

    async fn get_latest_state(
        &self,
        table: &str,
        row_id: &str,
    ) -> Result<Option<HashMap<String, ColumnValue>>> {
        let mut history = self.query_history(table, &[row_id.to_string()]).await?;
        sort_for_replay(&mut history);
        Ok(project_row_state(&history))
    }

    async fn close(&self) -> Result<()> {
        debug!(dialect = self.dialect.name(), "Adapter closed");
        Ok(())
    }

    fn as_materialisable(&self) -> Option<&dyn Materialisable> {
        Some(self)
    }
}

#[async_trait]
impl Materialisable for SqlAdapter {
    async fn materialise(&self, deltas: &[RowDelta], schemas: &[TableSchema]) -> Result<()> {
        materialise_sql(self, deltas, schemas).await
    }
}
