//! Postgres dialect — `$n` placeholders, JSONB, `ON CONFLICT … DO UPDATE`

use lakesync_core::{ColumnType, TableSchema};

use crate::dialect::{SqlDialect, DELTAS_TABLE, PROPS_COLUMN};

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, idx: usize) -> String {
        format!("${idx}")
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn sql_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::String | ColumnType::Null => "TEXT",
            ColumnType::Number => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Json => "JSONB",
        }
    }

    fn json_type(&self) -> &'static str {
        "JSONB"
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMPTZ"
    }

    fn now_expr(&self) -> &'static str {
        "NOW()"
    }

    fn create_deltas_table_sql(&self) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS \"{DELTAS_TABLE}\" (\
                 \"delta_id\" TEXT PRIMARY KEY, \
                 \"table\" TEXT NOT NULL, \
                 \"row_id\" TEXT NOT NULL, \
                 \"columns\" JSONB NOT NULL, \
                 \"hlc\" BIGINT NOT NULL, \
                 \"client_id\" TEXT NOT NULL, \
                 \"op\" TEXT NOT NULL)"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS \"{DELTAS_TABLE}_hlc_idx\" \
                 ON \"{DELTAS_TABLE}\" (\"hlc\")"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS \"{DELTAS_TABLE}_table_row_idx\" \
                 ON \"{DELTAS_TABLE}\" (\"table\", \"row_id\")"
            ),
        ]
    }

    fn insert_delta_sql(&self) -> String {
        format!(
            "INSERT INTO \"{DELTAS_TABLE}\" \
             (\"delta_id\", \"table\", \"row_id\", \"columns\", \"hlc\", \"client_id\", \"op\") \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (\"delta_id\") DO NOTHING"
        )
    }

    fn select_deltas_since_sql(&self, with_limit: bool) -> String {
        let mut sql = format!(
            "SELECT \"delta_id\", \"table\", \"row_id\", \"columns\", \"hlc\", \"client_id\", \"op\" \
             FROM \"{DELTAS_TABLE}\" WHERE \"hlc\" > $1 \
             ORDER BY \"hlc\" ASC, \"client_id\" ASC"
        );
        if with_limit {
            sql.push_str(" LIMIT $2");
        }
        sql
    }

    fn select_history_sql(&self, row_id_count: usize) -> String {
        let placeholders: Vec<String> = (0..row_id_count).map(|i| format!("${}", i + 2)).collect();
        format!(
            "SELECT \"delta_id\", \"table\", \"row_id\", \"columns\", \"hlc\", \"client_id\", \"op\" \
             FROM \"{DELTAS_TABLE}\" WHERE \"table\" = $1 AND \"row_id\" IN ({}) \
             ORDER BY \"hlc\" ASC, \"client_id\" ASC",
            placeholders.join(", ")
        )
    }

    fn select_deltas_before_sql(&self) -> String {
        format!(
            "SELECT \"delta_id\", \"table\", \"row_id\", \"columns\", \"hlc\", \"client_id\", \"op\" \
             FROM \"{DELTAS_TABLE}\" WHERE \"hlc\" < $1 \
             ORDER BY \"hlc\" ASC, \"client_id\" ASC"
        )
    }

    fn create_destination_table_sql(&self, schema: &TableSchema) -> Vec<String> {
        let mut cols = vec!["\"row_id\" TEXT PRIMARY KEY".to_string()];
        for col in &schema.columns {
            cols.push(format!("{} {}", self.quote_ident(&col.name), self.sql_type(col.column_type)));
        }
        cols.push(format!("\"{PROPS_COLUMN}\" JSONB NOT NULL DEFAULT '{{}}'"));
        cols.push("\"synced_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW()".to_string());
        if schema.soft_delete_enabled() {
            cols.push("\"deleted_at\" TIMESTAMPTZ".to_string());
        }
        let mut stmts = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote_ident(&schema.table),
            cols.join(", ")
        )];
        if let Some(external) = schema.external_id_column.as_deref() {
            stmts.push(format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                self.quote_ident(&format!("{}_{external}_key", schema.table)),
                self.quote_ident(&schema.table),
                self.quote_ident(external)
            ));
        }
        stmts
    }

    fn upsert_sql(&self, schema: &TableSchema, conflict_column: &str) -> String {
        let columns = self.destination_columns(schema);
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| c.as_str() != conflict_column)
            .map(|c| format!("{q} = EXCLUDED.{q}", q = self.quote_ident(c)))
            .chain(std::iter::once("\"synced_at\" = NOW()".to_string()))
            .collect();
        let mut update_arm = updates;
        if schema.soft_delete_enabled() {
            // An upsert resurrects a soft-deleted row.
            update_arm.push("\"deleted_at\" = NULL".to_string());
        }
        format!(
            "INSERT INTO {table} ({cols}, \"{PROPS_COLUMN}\", \"synced_at\") \
             VALUES ({vals}, '{{}}', NOW()) \
             ON CONFLICT ({conflict}) DO UPDATE SET {updates}",
            table = self.quote_ident(&schema.table),
            cols = quoted.join(", "),
            vals = placeholders.join(", "),
            conflict = self.quote_ident(conflict_column),
            updates = update_arm.join(", "),
        )
    }

    fn delete_sql(&self, schema: &TableSchema) -> String {
        format!("DELETE FROM {} WHERE \"row_id\" = $1", self.quote_ident(&schema.table))
    }

    fn soft_delete_sql(&self, schema: &TableSchema) -> String {
        format!(
            "UPDATE {} SET \"deleted_at\" = NOW(), \"synced_at\" = NOW() WHERE \"row_id\" = $1",
            self.quote_ident(&schema.table)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::conflict_column;

    fn schema() -> TableSchema {
        TableSchema::new(
            "tickets",
            vec![("title", ColumnType::String), ("done", ColumnType::Boolean)],
        )
    }

    #[test]
    fn test_upsert_excludes_props_from_update() {
        let sql = PostgresDialect.upsert_sql(&schema(), conflict_column(&schema()));
        let update_arm = sql.split("DO UPDATE SET").nth(1).unwrap();
        assert!(!update_arm.contains("\"props\""));
        assert!(update_arm.contains("\"synced_at\" = NOW()"));
        assert!(sql.contains("'{}'"));
        assert!(sql.contains("ON CONFLICT (\"row_id\")"));
    }

    #[test]
    fn test_destination_ddl_has_props_and_soft_delete() {
        let stmts = PostgresDialect.create_destination_table_sql(&schema());
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("\"props\" JSONB NOT NULL DEFAULT '{}'"));
        assert!(stmts[0].contains("\"deleted_at\" TIMESTAMPTZ"));
        assert!(stmts[0].starts_with("CREATE TABLE IF NOT EXISTS \"tickets\""));
    }

    #[test]
    fn test_external_id_conflict_target() {
        let schema = schema().with_external_id_column("jira_key");
        let sql = PostgresDialect.upsert_sql(&schema, conflict_column(&schema));
        assert!(sql.contains("ON CONFLICT (\"jira_key\")"));
        let ddl = PostgresDialect.create_destination_table_sql(&schema);
        assert_eq!(ddl.len(), 2);
        assert!(ddl[1].contains("CREATE UNIQUE INDEX"));
    }

    #[test]
    fn test_deltas_ddl_has_required_indexes() {
        let stmts = PostgresDialect.create_deltas_table_sql();
        assert_eq!(stmts.len(), 3);
        assert!(stmts[1].contains("(\"hlc\")"));
        assert!(stmts[2].contains("(\"table\", \"row_id\")"));
    }
}
