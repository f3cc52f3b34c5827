//! SQL executor contract — the narrow seam between SQL-speaking components
//! and their connections
//!
//! Warehouse dialects and CDC dialects build SQL text and parse rows; the
//! executor owns the connection. Concrete executors live with the adapters
//! (sqlx pools, BigQuery REST); tests script the contract directly.

use async_trait::async_trait;
use serde_json::Value;

use crate::delta::ColumnValue;
use crate::error::{LakeSyncError, Result};

/// A parameter or cell value crossing the SQL boundary
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
}

impl SqlValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<ColumnValue> for SqlValue {
    fn from(value: ColumnValue) -> Self {
        match value {
            ColumnValue::Null => SqlValue::Null,
            ColumnValue::Bool(b) => SqlValue::Bool(b),
            ColumnValue::Integer(i) => SqlValue::Int(i),
            ColumnValue::Float(f) => SqlValue::Float(f),
            ColumnValue::Text(s) => SqlValue::Text(s),
            ColumnValue::Json(v) => SqlValue::Json(v),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

/// One result row: column names aligned with values
#[derive(Debug, Clone, Default)]
pub struct SqlRow {
    pub columns: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(pairs: Vec<(&str, SqlValue)>) -> Self {
        let (columns, values) = pairs.into_iter().map(|(c, v)| (c.to_string(), v)).unzip();
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.iter().position(|c| c == column).map(|i| &self.values[i])
    }

    pub fn require_str(&self, column: &str) -> Result<&str> {
        self.get(column)
            .and_then(SqlValue::as_str)
            .ok_or_else(|| LakeSyncError::Sql(format!("missing text column '{column}'")))
    }

    pub fn require_i64(&self, column: &str) -> Result<i64> {
        self.get(column)
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| LakeSyncError::Sql(format!("missing integer column '{column}'")))
    }
}

/// Connection-owning SQL execution boundary
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a statement; returns affected row count
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run a query; returns result rows
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Liveness probe; default issues `SELECT 1`
    async fn ping(&self) -> Result<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_by_name() {
        let row = SqlRow::new(vec![
            ("id", SqlValue::Int(7)),
            ("name", SqlValue::Text("x".into())),
            ("meta", SqlValue::Null),
        ]);
        assert_eq!(row.require_i64("id").unwrap(), 7);
        assert_eq!(row.require_str("name").unwrap(), "x");
        assert!(row.get("meta").unwrap().is_null());
        assert!(row.require_str("missing").is_err());
    }

    #[test]
    fn test_column_value_conversion() {
        assert_eq!(SqlValue::from(ColumnValue::Integer(3)), SqlValue::Int(3));
        assert_eq!(SqlValue::from(ColumnValue::Null), SqlValue::Null);
        assert_eq!(
            SqlValue::from(ColumnValue::Json(serde_json::json!([1]))),
            SqlValue::Json(serde_json::json!([1]))
        );
    }
}
