//! MySQL dialect — `?` placeholders, JSON, `ON DUPLICATE KEY UPDATE`

use lakesync_core::{ColumnType, TableSchema};

use crate::dialect::{SqlDialect, DELTAS_TABLE, PROPS_COLUMN};

#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn placeholder(&self, _idx: usize) -> String {
        "?".to_string()
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn sql_type(&self, column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::String | ColumnType::Null => "TEXT",
            ColumnType::Number => "DOUBLE",
            ColumnType::Boolean => "TINYINT(1)",
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
        "NOW()"
    }

    fn create_deltas_table_sql(&self) -> Vec<String> {
        // MySQL needs key-length-bounded columns for the PK and indexes.
        vec![format!(
            "CREATE TABLE IF NOT EXISTS `{DELTAS_TABLE}` (\
             `delta_id` VARCHAR(64) PRIMARY KEY, \
             `table` VARCHAR(255) NOT NULL, \
             `row_id` VARCHAR(255) NOT NULL, \
             `columns` JSON NOT NULL, \
             `hlc` BIGINT NOT NULL, \
             `client_id` VARCHAR(255) NOT NULL, \
             `op` VARCHAR(16) NOT NULL, \
             INDEX `{DELTAS_TABLE}_hlc_idx` (`hlc`), \
             INDEX `{DELTAS_TABLE}_table_row_idx` (`table`, `row_id`))"
        )]
    }

    fn insert_delta_sql(&self) -> String {
        format!(
            "INSERT IGNORE INTO `{DELTAS_TABLE}` \
             (`delta_id`, `table`, `row_id`, `columns`, `hlc`, `client_id`, `op`) \
             VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
    }

    fn select_deltas_since_sql(&self, with_limit: bool) -> String {
        let mut sql = format!(
            "SELECT `delta_id`, `table`, `row_id`, `columns`, `hlc`, `client_id`, `op` \
             FROM `{DELTAS_TABLE}` WHERE `hlc` > ? \
             ORDER BY `hlc` ASC, `client_id` ASC"
        );
        if with_limit {
            sql.push_str(" LIMIT ?");
        }
        sql
    }

    fn select_history_sql(&self, row_id_count: usize) -> String {
        let placeholders = vec!["?"; row_id_count].join(", ");
        format!(
            "SELECT `delta_id`, `table`, `row_id`, `columns`, `hlc`, `client_id`, `op` \
             FROM `{DELTAS_TABLE}` WHERE `table` = ? AND `row_id` IN ({placeholders}) \
             ORDER BY `hlc` ASC, `client_id` ASC"
        )
    }

    fn select_deltas_before_sql(&self) -> String {
        format!(
            "SELECT `delta_id`, `table`, `row_id`, `columns`, `hlc`, `client_id`, `op` \
             FROM `{DELTAS_TABLE}` WHERE `hlc` < ? \
             ORDER BY `hlc` ASC, `client_id` ASC"
        )
    }

    fn create_destination_table_sql(&self, schema: &TableSchema) -> Vec<String> {
        let mut cols = vec!["`row_id` VARCHAR(255) PRIMARY KEY".to_string()];
        for col in &schema.columns {
            cols.push(format!("{} {}", self.quote_ident(&col.name), self.sql_type(col.column_type)));
        }
        // MySQL JSON columns cannot take a literal default; the upsert
        // supplies '{}' on every insert instead.
        cols.push(format!("`{PROPS_COLUMN}` JSON"));
        cols.push("`synced_at` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP".to_string());
        if schema.soft_delete_enabled() {
            cols.push("`deleted_at` TIMESTAMP NULL DEFAULT NULL".to_string());
        }
        if let Some(external) = schema.external_id_column.as_deref() {
            cols.push(format!("UNIQUE KEY `{}_{external}_key` (`{external}`(191))", schema.table));
        }
        vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote_ident(&schema.table),
            cols.join(", ")
        )]
    }

    fn upsert_sql(&self, schema: &TableSchema, conflict_column: &str) -> String {
        // MySQL resolves conflicts against any unique key, so the conflict
        // column only shapes the UPDATE arm.
        let columns = self.destination_columns(schema);
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let mut updates: Vec<String> = columns
            .iter()
            .filter(|c| c.as_str() != conflict_column)
            .map(|c| format!("{q} = VALUES({q})", q = self.quote_ident(c)))
            .collect();
        updates.push("`synced_at` = NOW()".to_string());
        if schema.soft_delete_enabled() {
            updates.push("`deleted_at` = NULL".to_string());
        }
        format!(
            "INSERT INTO {table} ({cols}, `{PROPS_COLUMN}`, `synced_at`) \
             VALUES ({placeholders}, '{{}}', NOW()) \
             ON DUPLICATE KEY UPDATE {updates}",
            table = self.quote_ident(&schema.table),
            cols = quoted.join(", "),
            updates = updates.join(", "),
        )
    }

    fn delete_sql(&self, schema: &TableSchema) -> String {
        format!("DELETE FROM {} WHERE `row_id` = ?", self.quote_ident(&schema.table))
    }

    fn soft_delete_sql(&self, schema: &TableSchema) -> String {
        format!(
            "UPDATE {} SET `deleted_at` = NOW(), `synced_at` = NOW() WHERE `row_id` = ?",
            self.quote_ident(&schema.table)
        )
    }
}
