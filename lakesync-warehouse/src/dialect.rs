//! SQL dialect abstraction
//!
//! A dialect owns everything engine-specific: parameter placeholders,
//! identifier quoting, the type map, JSON column types, upsert syntax, and
//! the DDL for the shared deltas table and destination tables. The
//! materialisation framework and the deltas-store adapter are written once
//! against this trait.
//!
//! Destination tables always carry `row_id` (string primary key), the typed
//! columns of the schema, `props` (consumer-owned JSON, never overwritten by
//! sync), `synced_at`, and `deleted_at` when soft delete is enabled.

use lakesync_core::{ColumnType, TableSchema};

/// Name of the shared warehouse deltas table
pub const DELTAS_TABLE: &str = "lakesync_deltas";

/// Destination column that materialisation never touches after insert
pub const PROPS_COLUMN: &str = "props";

/// Engine-specific SQL generation
pub trait SqlDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parameter placeholder for 1-based position `idx`
    fn placeholder(&self, idx: usize) -> String;

    fn quote_ident(&self, ident: &str) -> String;

    /// Type name for a schema column type
    fn sql_type(&self, column_type: ColumnType) -> &'static str;

    fn json_type(&self) -> &'static str;

    fn timestamp_type(&self) -> &'static str;

    /// SQL expression for the current timestamp
    fn now_expr(&self) -> &'static str;

    /// DDL for the deltas table and its indexes (idempotent statements)
    fn create_deltas_table_sql(&self) -> Vec<String>;

    /// Idempotent delta insert; params:
    /// `(delta_id, table, row_id, columns_json, hlc, client_id, op)`
    fn insert_delta_sql(&self) -> String;

    /// Deltas with `hlc > ?` ascending; params `(hlc)` or `(hlc, limit)`
    fn select_deltas_since_sql(&self, with_limit: bool) -> String;

    /// Full history for a set of rows of one table, ascending by hlc;
    /// params `(table, row_id, row_id, …)`
    fn select_history_sql(&self, row_id_count: usize) -> String;

    /// Deltas with `hlc < ?` (used by age-tier migration); params `(hlc)`
    fn select_deltas_before_sql(&self) -> String;

    /// Idempotent destination-table DDL for a schema (one statement per entry)
    fn create_destination_table_sql(&self, schema: &TableSchema) -> Vec<String>;

    /// How a JSON document travels as a bound parameter for this engine
    fn json_param(&self, value: &serde_json::Value) -> lakesync_core::SqlValue {
        lakesync_core::SqlValue::Json(value.clone())
    }

    /// Upsert one destination row.
    ///
    /// Inserted columns: `row_id`, every schema column, `props` (literal
    /// `'{}'`), `synced_at` (now). The UPDATE arm sets the schema columns
    /// and `synced_at` only — `props` is excluded by contract. Conflict
    /// target is `conflict_column`.
    fn upsert_sql(&self, schema: &TableSchema, conflict_column: &str) -> String;

    /// Remove a tombstoned row; params `(row_id)`
    fn delete_sql(&self, schema: &TableSchema) -> String;

    /// Soft-delete a tombstoned row (`deleted_at = now`); params `(row_id)`
    fn soft_delete_sql(&self, schema: &TableSchema) -> String;

    /// Column list shared by every destination table, in insert order
    fn destination_columns(&self, schema: &TableSchema) -> Vec<String> {
        let mut cols = vec!["row_id".to_string()];
        cols.extend(schema.columns.iter().map(|c| c.name.clone()));
        cols
    }
}

/// Conflict column for a schema: external id column, else the declared
/// primary key, else `row_id`
pub fn conflict_column(schema: &TableSchema) -> &str {
    if let Some(external) = schema.external_id_column.as_deref() {
        return external;
    }
    schema
        .primary_key
        .as_ref()
        .and_then(|pk| pk.first())
        .map(String::as_str)
        .unwrap_or("row_id")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_column_precedence() {
        let base = TableSchema::new("t", vec![("a", ColumnType::String)]);
        assert_eq!(conflict_column(&base), "row_id");

        let with_pk = base.clone().with_primary_key(vec!["a"]);
        assert_eq!(conflict_column(&with_pk), "a");

        let with_ext = with_pk.with_external_id_column("ext");
        assert_eq!(conflict_column(&with_ext), "ext");
    }
}
