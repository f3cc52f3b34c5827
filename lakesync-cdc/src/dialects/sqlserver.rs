//! SQL Server CDC dialect — native change data capture tables
//!
//! `ensure_capture` enables CDC on the database and on each captured table;
//! reads go through `cdc.fn_cdc_get_all_changes_<schema>_<table>`. Update
//! before-images (`__$operation = 3`) are skipped. The cursor is the hex
//! rendering of the 10-byte LSN, which compares lexicographically.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use lakesync_core::{
    ColumnSchema, ColumnType, Result, SqlExecutor, SqlValue, TableSchema, ROW_ID_SEPARATOR,
};

use crate::dialect::{CdcBatch, CdcCursor, CdcDialect, CdcRawChange, ChangeKind};

const OP_DELETE: i64 = 1;
const OP_INSERT: i64 = 2;
const OP_UPDATE_BEFORE: i64 = 3;
const OP_UPDATE_AFTER: i64 = 4;

pub struct SqlServerCdcDialect {
    executor: Arc<dyn SqlExecutor>,
    schema: String,
    tables: Mutex<Vec<String>>,
    key_columns: Mutex<HashMap<String, Vec<String>>>,
}

impl SqlServerCdcDialect {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            executor,
            schema: "dbo".to_string(),
            tables: Mutex::new(Vec::new()),
            key_columns: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    async fn key_columns_for(&self, table: &str) -> Result<Vec<String>> {
        if let Some(keys) = self.key_columns.lock().unwrap_or_else(|e| e.into_inner()).get(table)
        {
            return Ok(keys.clone());
        }
        let rows = self
            .executor
            .query(
                "SELECT k.COLUMN_NAME AS column_name \
                 FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE k \
                 JOIN INFORMATION_SCHEMA.TABLE_CONSTRAINTS c \
                   ON c.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
                 WHERE c.CONSTRAINT_TYPE = 'PRIMARY KEY' \
                   AND k.TABLE_SCHEMA = @p1 AND k.TABLE_NAME = @p2 \
                 ORDER BY k.ORDINAL_POSITION",
                &[SqlValue::Text(self.schema.clone()), SqlValue::Text(table.to_string())],
            )
            .await?;
        let keys: Vec<String> = rows
            .iter()
            .map(|r| r.require_str("column_name").map(String::from))
            .collect::<Result<_>>()?;
        self.key_columns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table.to_string(), keys.clone());
        Ok(keys)
    }

    fn map_operation(op: i64) -> Option<ChangeKind> {
        match op {
            OP_DELETE => Some(ChangeKind::Delete),
            OP_INSERT => Some(ChangeKind::Insert),
            OP_UPDATE_AFTER => Some(ChangeKind::Update),
            // Update before-image carries the pre-state only.
            OP_UPDATE_BEFORE => None,
            _ => None,
        }
    }

    /// Data columns of a change-table row (everything not `__$`-prefixed)
    fn data_columns(row: &lakesync_core::SqlRow) -> Vec<(String, SqlValue)> {
        row.columns
            .iter()
            .zip(row.values.iter())
            .filter(|(name, _)| !name.starts_with("__$"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    fn row_id_from(columns: &[(String, SqlValue)], keys: &[String]) -> String {
        let render = |value: &SqlValue| match value {
            SqlValue::Text(s) => s.clone(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Json(v) => v.to_string(),
            SqlValue::Null => String::new(),
        };
        if keys.is_empty() {
            return columns.first().map(|(_, v)| render(v)).unwrap_or_default();
        }
        keys.iter()
            .map(|key| {
                columns
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, v)| render(v))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(&ROW_ID_SEPARATOR.to_string())
    }
}

#[async_trait]
impl CdcDialect for SqlServerCdcDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    async fn connect(&self) -> Result<()> {
        self.executor.ping().await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_capture(&self, tables: Option<&[String]>) -> Result<()> {
        let wanted = match tables {
            Some(tables) => tables.to_vec(),
            None => {
                let rows = self
                    .executor
                    .query(
                        "SELECT TABLE_NAME AS table_name FROM INFORMATION_SCHEMA.TABLES \
                         WHERE TABLE_SCHEMA = @p1 AND TABLE_TYPE = 'BASE TABLE' \
                         ORDER BY TABLE_NAME",
                        &[SqlValue::Text(self.schema.clone())],
                    )
                    .await?;
                rows.iter()
                    .map(|r| r.require_str("table_name").map(String::from))
                    .collect::<Result<_>>()?
            }
        };

        self.executor
            .execute(
                "IF NOT EXISTS (SELECT 1 FROM sys.databases \
                 WHERE name = DB_NAME() AND is_cdc_enabled = 1) \
                 EXEC sys.sp_cdc_enable_db",
                &[],
            )
            .await?;

        for table in &wanted {
            self.executor
                .execute(
                    &format!(
                        "IF NOT EXISTS (SELECT 1 FROM cdc.change_tables \
                         WHERE capture_instance = '{schema}_{table}') \
                         EXEC sys.sp_cdc_enable_table \
                         @source_schema = N'{schema}', \
                         @source_name = N'{table}', \
                         @role_name = NULL",
                        schema = self.schema,
                    ),
                    &[],
                )
                .await?;
        }

        *self.tables.lock().unwrap_or_else(|e| e.into_inner()) = wanted;
        info!(schema = %self.schema, "SQL Server CDC capture ready");
        Ok(())
    }

    async fn fetch_changes(&self, cursor: &CdcCursor) -> Result<CdcBatch> {
        let since = match cursor {
            CdcCursor::Lsn { lsn } => lsn.clone(),
            _ => String::new(),
        };
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner()).clone();

        let mut changes = Vec::new();
        let mut max_lsn = since.clone();

        for table in &tables {
            let keys = self.key_columns_for(table).await?;
            let from_expr = if since.is_empty() {
                format!("sys.fn_cdc_get_min_lsn('{}_{}')", self.schema, table)
            } else {
                // Resume strictly after the consumed position.
                "sys.fn_cdc_increment_lsn(CONVERT(BINARY(10), @p1, 1))".to_string()
            };
            let sql = format!(
                "SELECT CONVERT(VARCHAR(22), __$start_lsn, 1) AS __$lsn_hex, \
                 __$operation, t.* \
                 FROM cdc.fn_cdc_get_all_changes_{schema}_{table}(\
                 {from_expr}, sys.fn_cdc_get_max_lsn(), N'all') t \
                 ORDER BY __$start_lsn ASC, __$seqval ASC",
                schema = self.schema,
            );
            let params: Vec<SqlValue> = if since.is_empty() {
                Vec::new()
            } else {
                vec![SqlValue::Text(since.clone())]
            };
            let rows = self.executor.query(&sql, &params).await?;

            for row in &rows {
                let operation = row.require_i64("__$operation")?;
                let Some(kind) = Self::map_operation(operation) else {
                    continue;
                };
                let lsn = row.require_str("__$lsn_hex")?.to_string();
                if lsn > max_lsn {
                    max_lsn = lsn.clone();
                }

                let data = Self::data_columns(row);
                let row_id = Self::row_id_from(&data, &keys);
                let columns = if kind == ChangeKind::Delete {
                    Vec::new()
                } else {
                    data.iter()
                        .map(|(name, value)| {
                            lakesync_core::ColumnDelta::new(name.clone(), sql_value_to_json(value))
                        })
                        .collect()
                };
                changes.push(CdcRawChange {
                    kind,
                    schema: self.schema.clone(),
                    table: table.clone(),
                    row_id,
                    columns,
                    captured_at_ms: None,
                });
            }
        }

        debug!(changes = changes.len(), cursor = %max_lsn, "SQL Server changes fetched");
        Ok(CdcBatch { changes, cursor: CdcCursor::lsn(max_lsn) })
    }

    async fn discover_schemas(&self, tables: Option<&[String]>) -> Result<Vec<TableSchema>> {
        let wanted: Option<Vec<String>> = tables.map(|t| t.to_vec());
        let rows = self
            .executor
            .query(
                "SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name, \
                 DATA_TYPE AS data_type \
                 FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_SCHEMA = @p1 \
                 ORDER BY TABLE_NAME, ORDINAL_POSITION",
                &[SqlValue::Text(self.schema.clone())],
            )
            .await?;

        let mut schemas: Vec<TableSchema> = Vec::new();
        for row in &rows {
            let table = row.require_str("table_name")?;
            if let Some(wanted) = &wanted {
                if !wanted.iter().any(|t| t == table) {
                    continue;
                }
            }
            if schemas.last().map(|s| s.table.as_str()) != Some(table) {
                let mut schema = TableSchema::new(table, vec![]);
                let keys = self.key_columns_for(table).await?;
                if !keys.is_empty() {
                    schema.primary_key = Some(keys);
                }
                schemas.push(schema);
            }
            if let Some(schema) = schemas.last_mut() {
                schema.columns.push(ColumnSchema {
                    name: row.require_str("column_name")?.to_string(),
                    column_type: mssql_type_to_column_type(row.require_str("data_type")?),
                });
            }
        }
        Ok(schemas)
    }

    fn default_cursor(&self) -> CdcCursor {
        CdcCursor::lsn("")
    }
}

fn sql_value_to_json(value: &SqlValue) -> serde_json::Value {
    match value {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Bool(b) => serde_json::json!(b),
        SqlValue::Int(i) => serde_json::json!(i),
        SqlValue::Float(f) => serde_json::json!(f),
        SqlValue::Text(s) => serde_json::json!(s),
        SqlValue::Json(v) => v.clone(),
    }
}

fn mssql_type_to_column_type(data_type: &str) -> ColumnType {
    match data_type {
        "bit" => ColumnType::Boolean,
        "tinyint" | "smallint" | "int" | "bigint" | "decimal" | "numeric" | "float" | "real" => {
            ColumnType::Number
        }
        _ => ColumnType::String,
    }
}
