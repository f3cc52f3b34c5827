//! Table schema descriptors shared by materialisation, codecs, and CDC discovery

use serde::{Deserialize, Serialize};

/// Column types a destination table can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Boolean,
    Json,
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Schema of one synced table
///
/// `source_table` remaps source identity to the destination name
/// (e.g. `jira_issues` → `tickets`); absent means the names coincide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id_column: Option<String>,
    /// Tombstones become `deleted_at` updates instead of row deletes (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_delete: Option<bool>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<(&str, ColumnType)>) -> Self {
        Self {
            table: table.into(),
            columns: columns
                .into_iter()
                .map(|(name, column_type)| ColumnSchema { name: name.to_string(), column_type })
                .collect(),
            primary_key: None,
            source_table: None,
            external_id_column: None,
            soft_delete: None,
        }
    }

    pub fn with_primary_key(mut self, columns: Vec<&str>) -> Self {
        self.primary_key = Some(columns.into_iter().map(String::from).collect());
        self
    }

    pub fn with_source_table(mut self, source: impl Into<String>) -> Self {
        self.source_table = Some(source.into());
        self
    }

    pub fn with_external_id_column(mut self, column: impl Into<String>) -> Self {
        self.external_id_column = Some(column.into());
        self
    }

    pub fn with_soft_delete(mut self, soft_delete: bool) -> Self {
        self.soft_delete = Some(soft_delete);
        self
    }

    /// The table name deltas arrive under
    pub fn source_name(&self) -> &str {
        self.source_table.as_deref().unwrap_or(&self.table)
    }

    /// Soft delete defaults to true when unset
    pub fn soft_delete_enabled(&self) -> bool {
        self.soft_delete.unwrap_or(true)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}
