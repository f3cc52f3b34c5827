//! Postgres CDC dialect — wal2json logical replication slot
//!
//! Capture runs through a `wal2json` slot named `lakesync_cdc`, consumed with
//! `pg_logical_slot_get_changes`. The cursor is the LSN of the last consumed
//! row; because `get_changes` consumes, the cursor mainly guards against
//! re-delivery on overlapping reads after a restart.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use tracing::{debug, info, warn};

use lakesync_core::{
    ColumnDelta, ColumnType, LakeSyncError, Result, SqlExecutor, SqlValue, TableSchema,
    ROW_ID_SEPARATOR,
};

use crate::dialect::{CdcBatch, CdcCursor, CdcDialect, CdcRawChange, ChangeKind};

/// Replication slot owned by LakeSync
pub const SLOT_NAME: &str = "lakesync_cdc";

pub struct PostgresCdcDialect {
    executor: Arc<dyn SqlExecutor>,
    slot_name: String,
}

impl PostgresCdcDialect {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self { executor, slot_name: SLOT_NAME.to_string() }
    }

    pub fn with_slot_name(mut self, slot_name: impl Into<String>) -> Self {
        self.slot_name = slot_name.into();
        self
    }

    /// Decode one wal2json payload into raw changes
    fn parse_wal2json(payload: &str) -> Result<Vec<CdcRawChange>> {
        let doc: Value = serde_json::from_str(payload)?;
        let captured_at_ms = doc["timestamp"]
            .as_str()
            .and_then(parse_pg_timestamp_ms);

        let mut out = Vec::new();
        let Some(changes) = doc["change"].as_array() else {
            return Ok(out);
        };
        for change in changes {
            let kind = match change["kind"].as_str() {
                Some("insert") => ChangeKind::Insert,
                Some("update") => ChangeKind::Update,
                Some("delete") => ChangeKind::Delete,
                other => {
                    debug!(kind = ?other, "Skipping non-row wal2json entry");
                    continue;
                }
            };

            let names: Vec<&str> = change["columnnames"]
                .as_array()
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let values: Vec<Value> =
                change["columnvalues"].as_array().cloned().unwrap_or_default();

            let columns: Vec<ColumnDelta> = if kind == ChangeKind::Delete {
                Vec::new()
            } else {
                names
                    .iter()
                    .zip(values.iter())
                    .map(|(name, value)| ColumnDelta::new(*name, value.clone()))
                    .collect()
            };

            let row_id = row_id_from_change(change, &names, &values)?;

            out.push(CdcRawChange {
                kind,
                schema: change["schema"].as_str().unwrap_or("public").to_string(),
                table: change["table"]
                    .as_str()
                    .ok_or_else(|| LakeSyncError::Serialization("wal2json change without table".into()))?
                    .to_string(),
                row_id,
                columns,
                captured_at_ms,
            });
        }
        Ok(out)
    }
}

/// Row identity: `oldkeys` joined with `:`, falling back to the first column
fn row_id_from_change(change: &Value, names: &[&str], values: &[Value]) -> Result<String> {
    if let Some(key_values) = change["oldkeys"]["keyvalues"].as_array() {
        if !key_values.is_empty() {
            return Ok(key_values
                .iter()
                .map(scalar_to_string)
                .collect::<Vec<_>>()
                .join(&ROW_ID_SEPARATOR.to_string()));
        }
    }
    match (names.first(), values.first()) {
        (Some(name), Some(value)) => {
            warn!(column = name, "No declared key in wal2json change, using first column");
            Ok(scalar_to_string(value))
        }
        _ => Err(LakeSyncError::Serialization("wal2json change without key or columns".into())),
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `2026-02-01 12:00:00.123456+00` → epoch ms
fn parse_pg_timestamp_ms(raw: &str) -> Option<u64> {
    DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z")
        .ok()
        .map(|dt| dt.timestamp_millis() as u64)
}

/// `0/16B3748` → numeric LSN for ordering
pub(crate) fn parse_lsn(lsn: &str) -> Option<u64> {
    let (high, low) = lsn.split_once('/')?;
    let high = u64::from_str_radix(high, 16).ok()?;
    let low = u64::from_str_radix(low, 16).ok()?;
    Some((high << 32) | low)
}

#[async_trait]
impl CdcDialect for PostgresCdcDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self) -> Result<()> {
        self.executor.ping().await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_capture(&self, _tables: Option<&[String]>) -> Result<()> {
        let existing = self
            .executor
            .query(
                "SELECT slot_name FROM pg_replication_slots WHERE slot_name = $1",
                &[SqlValue::Text(self.slot_name.clone())],
            )
            .await?;
        if existing.is_empty() {
            self.executor
                .query(
                    "SELECT pg_create_logical_replication_slot($1, 'wal2json')",
                    &[SqlValue::Text(self.slot_name.clone())],
                )
                .await?;
            info!(slot = %self.slot_name, "Created wal2json replication slot");
        }
        Ok(())
    }

    async fn fetch_changes(&self, cursor: &CdcCursor) -> Result<CdcBatch> {
        let since = match cursor {
            CdcCursor::Lsn { lsn } if !lsn.is_empty() => parse_lsn(lsn),
            _ => None,
        };

        let rows = self
            .executor
            .query(
                "SELECT lsn::text AS lsn, xid::text AS xid, data \
                 FROM pg_logical_slot_get_changes($1, NULL, NULL, 'include-timestamp', 'on')",
                &[SqlValue::Text(self.slot_name.clone())],
            )
            .await?;

        let mut changes = Vec::new();
        let mut last_lsn = match cursor {
            CdcCursor::Lsn { lsn } => lsn.clone(),
            _ => String::new(),
        };
        for row in &rows {
            let lsn = row.require_str("lsn")?;
            // Rows at or below the cursor were already delivered.
            if let (Some(since), Some(this)) = (since, parse_lsn(lsn)) {
                if this <= since {
                    continue;
                }
            }
            changes.extend(Self::parse_wal2json(row.require_str("data")?)?);
            last_lsn = lsn.to_string();
        }

        Ok(CdcBatch { changes, cursor: CdcCursor::lsn(last_lsn) })
    }

    async fn discover_schemas(&self, tables: Option<&[String]>) -> Result<Vec<TableSchema>> {
        let rows = self
            .executor
            .query(
                "SELECT c.table_name, c.column_name, c.data_type, \
                 (k.column_name IS NOT NULL) AS is_pk \
                 FROM information_schema.columns c \
                 LEFT JOIN information_schema.key_column_usage k \
                   ON k.table_schema = c.table_schema \
                  AND k.table_name = c.table_name \
                  AND k.column_name = c.column_name \
                  AND k.constraint_name LIKE '%_pkey' \
                 WHERE c.table_schema = 'public' \
                 ORDER BY c.table_name, c.ordinal_position",
                &[],
            )
            .await?;

        let mut schemas: Vec<TableSchema> = Vec::new();
        for row in &rows {
            let table = row.require_str("table_name")?;
            if let Some(wanted) = tables {
                if !wanted.iter().any(|t| t == table) {
                    continue;
                }
            }
            let column = row.require_str("column_name")?.to_string();
            let column_type = pg_type_to_column_type(row.require_str("data_type")?);
            let is_pk = matches!(row.get("is_pk"), Some(SqlValue::Bool(true)));

            if schemas.last().map(|s| s.table.as_str()) != Some(table) {
                schemas.push(TableSchema::new(table, vec![]));
            }
            if let Some(schema) = schemas.last_mut() {
                schema
                    .columns
                    .push(lakesync_core::ColumnSchema { name: column.clone(), column_type });
                if is_pk {
                    schema.primary_key.get_or_insert_with(Vec::new).push(column);
                }
            }
        }
        Ok(schemas)
    }

    fn default_cursor(&self) -> CdcCursor {
        CdcCursor::lsn("")
    }
}

fn pg_type_to_column_type(data_type: &str) -> ColumnType {
    match data_type {
        "smallint" | "integer" | "bigint" | "numeric" | "real" | "double precision" => {
            ColumnType::Number
        }
        "boolean" => ColumnType::Boolean,
        "json" | "jsonb" => ColumnType::Json,
        _ => ColumnType::String,
    }
}
