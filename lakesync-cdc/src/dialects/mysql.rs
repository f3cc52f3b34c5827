//! MySQL CDC dialect — trigger-fed changelog table
//!
//! `ensure_capture` creates `_lakesync_cdc_log` plus AFTER INSERT/UPDATE/
//! DELETE triggers per captured table. Each trigger writes the row id, the
//! operation, and a `JSON_ARRAY` of `{column, value}` entries; the cursor is
//! the changelog's autoincrement high-water mark.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use lakesync_core::{
    ColumnDelta, ColumnSchema, ColumnType, LakeSyncError, Result, SqlExecutor, SqlValue,
    TableSchema,
};

use crate::dialect::{CdcBatch, CdcCursor, CdcDialect, CdcRawChange, ChangeKind};

/// Changelog table written by the capture triggers
pub const CHANGELOG_TABLE: &str = "_lakesync_cdc_log";

pub struct MySqlCdcDialect {
    executor: Arc<dyn SqlExecutor>,
}

impl MySqlCdcDialect {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self { executor }
    }

    async fn captured_tables(&self, tables: Option<&[String]>) -> Result<Vec<String>> {
        if let Some(tables) = tables {
            return Ok(tables.to_vec());
        }
        let rows = self
            .executor
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
                 AND table_name <> ? ORDER BY table_name",
                &[SqlValue::Text(CHANGELOG_TABLE.to_string())],
            )
            .await?;
        rows.iter().map(|r| r.require_str("table_name").map(String::from)).collect()
    }

    async fn table_columns(&self, table: &str) -> Result<(Vec<String>, Vec<String>)> {
        let rows = self
            .executor
            .query(
                "SELECT column_name, column_key FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                 ORDER BY ordinal_position",
                &[SqlValue::Text(table.to_string())],
            )
            .await?;
        let mut columns = Vec::new();
        let mut key_columns = Vec::new();
        for row in &rows {
            let name = row.require_str("column_name")?.to_string();
            if row.get("column_key").and_then(SqlValue::as_str) == Some("PRI") {
                key_columns.push(name.clone());
            }
            columns.push(name);
        }
        if key_columns.is_empty() {
            if let Some(first) = columns.first() {
                debug!(table, column = %first, "No primary key, using first column as row id");
                key_columns.push(first.clone());
            }
        }
        Ok((columns, key_columns))
    }

    /// `CONCAT_WS(':', NEW.a, NEW.b)` — the trigger-side row id expression
    fn row_id_expr(prefix: &str, key_columns: &[String]) -> String {
        let parts: Vec<String> =
            key_columns.iter().map(|c| format!("{prefix}.`{c}`")).collect();
        format!("CONCAT_WS(':', {})", parts.join(", "))
    }

    /// `JSON_ARRAY(JSON_OBJECT('column','a','value',NEW.a), …)`
    fn columns_expr(prefix: &str, columns: &[String]) -> String {
        let entries: Vec<String> = columns
            .iter()
            .map(|c| format!("JSON_OBJECT('column', '{c}', 'value', {prefix}.`{c}`)"))
            .collect();
        format!("JSON_ARRAY({})", entries.join(", "))
    }

    async fn create_triggers(&self, table: &str) -> Result<()> {
        let (columns, key_columns) = self.table_columns(table).await?;
        if columns.is_empty() {
            return Err(LakeSyncError::Config(format!("table '{table}' has no columns")));
        }

        let specs = [
            ("insert", "AFTER INSERT", Self::row_id_expr("NEW", &key_columns), Self::columns_expr("NEW", &columns)),
            // UPDATE identity comes from the pre-image, values from the post-image.
            ("update", "AFTER UPDATE", Self::row_id_expr("OLD", &key_columns), Self::columns_expr("NEW", &columns)),
            ("delete", "AFTER DELETE", Self::row_id_expr("OLD", &key_columns), "JSON_ARRAY()".to_string()),
        ];

        for (op, timing, row_id, columns_json) in specs {
            let trigger = format!("_lakesync_cdc_{table}_{op}");
            self.executor
                .execute(&format!("DROP TRIGGER IF EXISTS `{trigger}`"), &[])
                .await?;
            self.executor
                .execute(
                    &format!(
                        "CREATE TRIGGER `{trigger}` {timing} ON `{table}` FOR EACH ROW \
                         INSERT INTO `{CHANGELOG_TABLE}` (table_name, row_id, op, `columns`) \
                         VALUES ('{table}', {row_id}, '{op}', {columns_json})"
                    ),
                    &[],
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CdcDialect for MySqlCdcDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn connect(&self) -> Result<()> {
        self.executor.ping().await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_capture(&self, tables: Option<&[String]>) -> Result<()> {
        self.executor
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS `{CHANGELOG_TABLE}` (\
                     `id` BIGINT AUTO_INCREMENT PRIMARY KEY, \
                     `table_name` VARCHAR(255) NOT NULL, \
                     `row_id` VARCHAR(255) NOT NULL, \
                     `op` VARCHAR(16) NOT NULL, \
                     `columns` JSON NOT NULL, \
                     `captured_at` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)"
                ),
                &[],
            )
            .await?;

        for table in self.captured_tables(tables).await? {
            self.create_triggers(&table).await?;
        }
        info!("MySQL capture triggers ready");
        Ok(())
    }

    async fn fetch_changes(&self, cursor: &CdcCursor) -> Result<CdcBatch> {
        let last_id = match cursor {
            CdcCursor::LastId { last_id } => *last_id,
            _ => 0,
        };
        let rows = self
            .executor
            .query(
                &format!(
                    "SELECT `id`, `table_name`, `row_id`, `op`, \
                     CAST(`columns` AS CHAR) AS `columns`, \
                     UNIX_TIMESTAMP(`captured_at`) AS `captured_at` \
                     FROM `{CHANGELOG_TABLE}` WHERE `id` > ? ORDER BY `id` ASC"
                ),
                &[SqlValue::Int(last_id)],
            )
            .await?;

        let mut changes = Vec::new();
        let mut max_id = last_id;
        for row in &rows {
            max_id = max_id.max(row.require_i64("id")?);
            let kind = match row.require_str("op")? {
                "insert" => ChangeKind::Insert,
                "update" => ChangeKind::Update,
                "delete" => ChangeKind::Delete,
                other => {
                    return Err(LakeSyncError::Serialization(format!(
                        "unknown changelog op '{other}'"
                    )))
                }
            };
            let columns_doc: Value = match row.get("columns") {
                Some(SqlValue::Json(v)) => v.clone(),
                Some(SqlValue::Text(s)) => serde_json::from_str(s)?,
                _ => Value::Array(Vec::new()),
            };
            let columns = if kind == ChangeKind::Delete {
                Vec::new()
            } else {
                columns_doc
                    .as_array()
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|e| {
                                e["column"]
                                    .as_str()
                                    .map(|name| ColumnDelta::new(name, e["value"].clone()))
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            };
            changes.push(CdcRawChange {
                kind,
                schema: String::new(),
                table: row.require_str("table_name")?.to_string(),
                row_id: row.require_str("row_id")?.to_string(),
                columns,
                captured_at_ms: row
                    .get("captured_at")
                    .and_then(SqlValue::as_i64)
                    .map(|secs| secs as u64 * 1000),
            });
        }

        Ok(CdcBatch { changes, cursor: CdcCursor::last_id(max_id) })
    }

    async fn discover_schemas(&self, tables: Option<&[String]>) -> Result<Vec<TableSchema>> {
        let mut schemas = Vec::new();
        for table in self.captured_tables(tables).await? {
            let rows = self
                .executor
                .query(
                    "SELECT column_name, data_type, column_key \
                     FROM information_schema.columns \
                     WHERE table_schema = DATABASE() AND table_name = ? \
                     ORDER BY ordinal_position",
                    &[SqlValue::Text(table.clone())],
                )
                .await?;
            let mut schema = TableSchema::new(table, vec![]);
            for row in &rows {
                let name = row.require_str("column_name")?.to_string();
                schema.columns.push(ColumnSchema {
                    name: name.clone(),
                    column_type: mysql_type_to_column_type(row.require_str("data_type")?),
                });
                if row.get("column_key").and_then(SqlValue::as_str) == Some("PRI") {
                    schema.primary_key.get_or_insert_with(Vec::new).push(name);
                }
            }
            schemas.push(schema);
        }
        Ok(schemas)
    }

    fn default_cursor(&self) -> CdcCursor {
        CdcCursor::last_id(0)
    }
}

fn mysql_type_to_column_type(data_type: &str) -> ColumnType {
    match data_type {
        "tinyint" => ColumnType::Boolean,
        "smallint" | "mediumint" | "int" | "bigint" | "decimal" | "float" | "double" => {
            ColumnType::Number
        }
        "json" => ColumnType::Json,
        _ => ColumnType::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_expr_composite() {
        let expr =
            MySqlCdcDialect::row_id_expr("OLD", &["region".to_string(), "seq".to_string()]);
        assert_eq!(expr, "CONCAT_WS(':', OLD.`region`, OLD.`seq`)");
    }

    #[test]
    fn test_columns_expr_shape() {
        let expr = MySqlCdcDialect::columns_expr("NEW", &["a".to_string(), "b".to_string()]);
        assert_eq!(
            expr,
            "JSON_ARRAY(JSON_OBJECT('column', 'a', 'value', NEW.`a`), \
             JSON_OBJECT('column', 'b', 'value', NEW.`b`))"
        );
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(mysql_type_to_column_type("tinyint"), ColumnType::Boolean);
        assert_eq!(mysql_type_to_column_type("bigint"), ColumnType::Number);
        assert_eq!(mysql_type_to_column_type("json"), ColumnType::Json);
        assert_eq!(mysql_type_to_column_type("varchar"), ColumnType::String);
    }
}
