//! BigQuery dialect — `@pN` named parameters, `MERGE … USING`
//!
//! BigQuery has no enforced keys or secondary indexes, so delta idempotence
//! and destination upserts both go through `MERGE`. Tables are optionally
//! qualified with a dataset.

use lakesync_core::{ColumnType, TableSchema};

use crate::dialect::{SqlDialect, DELTAS_TABLE, PROPS_COLUMN};

#[derive(Debug, Default, Clone)]
pub struct BigQueryDialect {
    dataset: Option<String>,
}

impl BigQueryDialect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    fn table_ref(&self, table: &str) -> String {
        match &self.dataset {
            Some(dataset) => format!("`{dataset}.{table}`"),
            None => format!("`{table}`"),
        }
    }
}

impl SqlDialect for BigQueryDialect {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn placeholder(&self, idx: usize) -> String {
        format!("@p{idx}")
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', ""))
    }

    fn sql_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::String | ColumnType::Null => "STRING",
            ColumnType::Number => "FLOAT64",
            ColumnType::Boolean => "BOOL",
            ColumnType::Json => "JSON",
        }
    }

    fn json_type(&self) -> &'static str {
        "JSON"
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMP"
    }

    fn now_expr(&self) -> &'static str {
        "CURRENT_TIMESTAMP()"
    }

    fn create_deltas_table_sql(&self) -> Vec<String> {
        // No secondary indexes in BigQuery; clustering covers the read paths.
        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             delta_id STRING NOT NULL, \
             `table` STRING NOT NULL, \
             row_id STRING NOT NULL, \
             `columns` JSON NOT NULL, \
             hlc INT64 NOT NULL, \
             client_id STRING NOT NULL, \
             op STRING NOT NULL) \
             CLUSTER BY `table`, row_id",
            self.table_ref(DELTAS_TABLE)
        )]
    }

    fn insert_delta_sql(&self) -> String {
        format!(
            "MERGE {} T \
             USING (SELECT @p1 AS delta_id, @p2 AS `table`, @p3 AS row_id, \
                    PARSE_JSON(@p4) AS `columns`, @p5 AS hlc, @p6 AS client_id, @p7 AS op) S \
             ON T.delta_id = S.delta_id \
             WHEN NOT MATCHED THEN \
             INSERT (delta_id, `table`, row_id, `columns`, hlc, client_id, op) \
             VALUES (S.delta_id, S.`table`, S.row_id, S.`columns`, S.hlc, S.client_id, S.op)",
            self.table_ref(DELTAS_TABLE)
        )
    }

    fn select_deltas_since_sql(&self, with_limit: bool) -> String {
        let mut sql = format!(
            "SELECT delta_id, `table`, row_id, TO_JSON_STRING(`columns`) AS `columns`, \
             hlc, client_id, op \
             FROM {} WHERE hlc > @p1 \
             ORDER BY hlc ASC, client_id ASC",
            self.table_ref(DELTAS_TABLE)
        );
        if with_limit {
            sql.push_str(" LIMIT @p2");
        }
        sql
    }

    fn select_history_sql(&self, row_id_count: usize) -> String {
        let placeholders: Vec<String> = (0..row_id_count).map(|i| format!("@p{}", i + 2)).collect();
        format!(
            "SELECT delta_id, `table`, row_id, TO_JSON_STRING(`columns`) AS `columns`, \
             hlc, client_id, op \
             FROM {} WHERE `table` = @p1 AND row_id IN ({}) \
             ORDER BY hlc ASC, client_id ASC",
            self.table_ref(DELTAS_TABLE),
            placeholders.join(", ")
        )
    }

    fn select_deltas_before_sql(&self) -> String {
        format!(
            "SELECT delta_id, `table`, row_id, TO_JSON_STRING(`columns`) AS `columns`, \
             hlc, client_id, op \
             FROM {} WHERE hlc < @p1 \
             ORDER BY hlc ASC, client_id ASC",
            self.table_ref(DELTAS_TABLE)
        )
    }

    fn create_destination_table_sql(&self, schema: &TableSchema) -> Vec<String> {
        let mut cols = vec!["row_id STRING NOT NULL".to_string()];
        for col in &schema.columns {
            cols.push(format!("{} {}", self.quote_ident(&col.name), self.sql_type(col.column_type)));
        }
        cols.push(format!("{PROPS_COLUMN} JSON"));
        cols.push("synced_at TIMESTAMP".to_string());
        if schema.soft_delete_enabled() {
            cols.push("deleted_at TIMESTAMP".to_string());
        }
        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({}) CLUSTER BY row_id",
            self.table_ref(&schema.table),
            cols.join(", ")
        )]
    }

    fn json_param(&self, value: &serde_json::Value) -> lakesync_core::SqlValue {
        // Travels as a STRING through PARSE_JSON in the insert statement.
        lakesync_core::SqlValue::Text(value.to_string())
    }

    fn upsert_sql(&self, schema: &TableSchema, conflict_column: &str) -> String {
        let columns = self.destination_columns(schema);
        let source_cols: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("@p{} AS {}", i + 1, self.quote_ident(c)))
            .collect();
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| c.as_str() != conflict_column)
            .map(|c| format!("{q} = S.{q}", q = self.quote_ident(c)))
            .chain(std::iter::once("synced_at = CURRENT_TIMESTAMP()".to_string()))
            .collect();
        let mut update_arm = updates;
        if schema.soft_delete_enabled() {
            update_arm.push("deleted_at = NULL".to_string());
        }
        let insert_cols: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        let insert_vals: Vec<String> =
            columns.iter().map(|c| format!("S.{}", self.quote_ident(c))).collect();
        format!(
            "MERGE {table} T USING (SELECT {source}) S \
             ON T.{conflict} = S.{conflict} \
             WHEN MATCHED THEN UPDATE SET {updates} \
             WHEN NOT MATCHED THEN \
             INSERT ({cols}, {PROPS_COLUMN}, synced_at) \
             VALUES ({vals}, JSON '{{}}', CURRENT_TIMESTAMP())",
            table = self.table_ref(&schema.table),
            source = source_cols.join(", "),
            conflict = self.quote_ident(conflict_column),
            updates = update_arm.join(", "),
            cols = insert_cols.join(", "),
            vals = insert_vals.join(", "),
        )
    }

    fn delete_sql(&self, schema: &TableSchema) -> String {
        format!("DELETE FROM {} WHERE row_id = @p1", self.table_ref(&schema.table))
    }

    fn soft_delete_sql(&self, schema: &TableSchema) -> String {
        format!(
            "UPDATE {} SET deleted_at = CURRENT_TIMESTAMP(), synced_at = CURRENT_TIMESTAMP() \
             WHERE row_id = @p1",
            self.table_ref(&schema.table)
        )
    }
}
