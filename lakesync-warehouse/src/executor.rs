//! Concrete [`SqlExecutor`] implementations
//!
//! Postgres and MySQL run over sqlx pools; BigQuery over the REST jobs API.
//! Everything engine-specific about *syntax* stays in the dialects — the
//! executors only move parameters and rows across the boundary.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{Column, MySqlPool, PgPool, Row};
use tokio::time::sleep;
use tracing::{debug, warn};

use lakesync_core::{LakeSyncError, Result, SqlExecutor, SqlRow, SqlValue};

// ─── Postgres ───

/// sqlx-backed Postgres executor
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| LakeSyncError::Sql(format!("postgres connect: {e}")))?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn bind<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
        value: &'q SqlValue,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Json(v) => query.bind(v),
        }
    }

    fn decode_row(row: &sqlx::postgres::PgRow) -> SqlRow {
        let mut out = SqlRow::default();
        for (i, col) in row.columns().iter().enumerate() {
            out.columns.push(col.name().to_string());
            out.values.push(decode_cell(
                row.try_get::<Option<i64>, _>(i).ok().flatten().map(SqlValue::Int),
                || row.try_get::<Option<f64>, _>(i).ok().flatten().map(SqlValue::Float),
                || row.try_get::<Option<bool>, _>(i).ok().flatten().map(SqlValue::Bool),
                || row.try_get::<Option<String>, _>(i).ok().flatten().map(SqlValue::Text),
                || row.try_get::<Option<Value>, _>(i).ok().flatten().map(SqlValue::Json),
                || {
                    row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
                        .ok()
                        .flatten()
                        .map(|ts| SqlValue::Text(ts.to_rfc3339()))
                },
            ));
        }
        out
    }
}

fn decode_cell(
    first: Option<SqlValue>,
    f2: impl FnOnce() -> Option<SqlValue>,
    f3: impl FnOnce() -> Option<SqlValue>,
    f4: impl FnOnce() -> Option<SqlValue>,
    f5: impl FnOnce() -> Option<SqlValue>,
    f6: impl FnOnce() -> Option<SqlValue>,
) -> SqlValue {
    first
        .or_else(f2)
        .or_else(f3)
        .or_else(f4)
        .or_else(f5)
        .or_else(f6)
        .unwrap_or(SqlValue::Null)
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for p in params {
            query = Self::bind(query, p);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| LakeSyncError::Sql(format!("postgres execute: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let mut query = sqlx::query(sql);
        for p in params {
            query = Self::bind(query, p);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LakeSyncError::Sql(format!("postgres query: {e}")))?;
        Ok(rows.iter().map(Self::decode_row).collect())
    }
}

// ─── MySQL ───

/// sqlx-backed MySQL executor
pub struct MySqlExecutor {
    pool: MySqlPool,
}

impl MySqlExecutor {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = MySqlPool::connect(url)
            .await
            .map_err(|e| LakeSyncError::Sql(format!("mysql connect: {e}")))?;
        Ok(Self { pool })
    }

    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    fn bind<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
        value: &'q SqlValue,
    ) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
        match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.as_str()),
            SqlValue::Json(v) => query.bind(v),
        }
    }

    fn decode_row(row: &sqlx::mysql::MySqlRow) -> SqlRow {
        let mut out = SqlRow::default();
        for (i, col) in row.columns().iter().enumerate() {
            out.columns.push(col.name().to_string());
            out.values.push(decode_cell(
                row.try_get::<Option<i64>, _>(i).ok().flatten().map(SqlValue::Int),
                || row.try_get::<Option<f64>, _>(i).ok().flatten().map(SqlValue::Float),
                || row.try_get::<Option<bool>, _>(i).ok().flatten().map(SqlValue::Bool),
                || row.try_get::<Option<String>, _>(i).ok().flatten().map(SqlValue::Text),
                || row.try_get::<Option<Value>, _>(i).ok().flatten().map(SqlValue::Json),
                || {
                    row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
                        .ok()
                        .flatten()
                        .map(|ts| SqlValue::Text(ts.to_rfc3339()))
                },
            ));
        }
        out
    }
}

#[async_trait]
impl SqlExecutor for MySqlExecutor {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let mut query = sqlx::query(sql);
        for p in params {
            query = Self::bind(query, p);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| LakeSyncError::Sql(format!("mysql execute: {e}")))?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let mut query = sqlx::query(sql);
        for p in params {
            query = Self::bind(query, p);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LakeSyncError::Sql(format!("mysql query: {e}")))?;
        Ok(rows.iter().map(Self::decode_row).collect())
    }
}

// ─── BigQuery ───

const BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";
const MAX_QUERY_ATTEMPTS: usize = 3;

/// BigQuery REST executor — `jobs.query` with named parameters (`@pN`)
pub struct BigQueryExecutor {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    access_token: String,
}

impl BigQueryExecutor {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: BIGQUERY_ENDPOINT.to_string(),
            project_id: project_id.into(),
            access_token: access_token.into(),
        }
    }

    /// Point at a different endpoint (tests, emulators)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn query_parameter(idx: usize, value: &SqlValue) -> Value {
        let (ty, val) = match value {
            SqlValue::Null => ("STRING", Value::Null),
            SqlValue::Bool(b) => ("BOOL", json!(b.to_string())),
            SqlValue::Int(i) => ("INT64", json!(i.to_string())),
            SqlValue::Float(f) => ("FLOAT64", json!(f.to_string())),
            SqlValue::Text(s) => ("STRING", json!(s)),
            SqlValue::Json(v) => ("JSON", json!(v.to_string())),
        };
        json!({
            "name": format!("p{}", idx + 1),
            "parameterType": {"type": ty},
            "parameterValue": {"value": val},
        })
    }

    async fn run(&self, sql: &str, params: &[SqlValue]) -> Result<Value> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.endpoint, self.project_id
        );
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": params
                .iter()
                .enumerate()
                .map(|(i, p)| Self::query_parameter(i, p))
                .collect::<Vec<_>>(),
        });

        let mut attempts = 0;
        loop {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .json(&body)
                .send()
                .await
                .map_err(|e| LakeSyncError::Http(format!("bigquery request: {e}")))?;

            let status = response.status();
            if status.as_u16() == 429 {
                let retry_after_ms = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|secs| secs * 1000)
                    .unwrap_or(1000);
                attempts += 1;
                if attempts >= MAX_QUERY_ATTEMPTS {
                    return Err(LakeSyncError::RateLimited { retry_after_ms });
                }
                warn!(attempts, retry_after_ms, "BigQuery rate limited, backing off");
                sleep(Duration::from_millis(retry_after_ms)).await;
                continue;
            }
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(LakeSyncError::Sql(format!("bigquery HTTP {status}: {detail}")));
            }

            let payload: Value = response
                .json()
                .await
                .map_err(|e| LakeSyncError::Serialization(e.to_string()))?;
            if let Some(error) = payload.get("error") {
                return Err(LakeSyncError::Sql(format!("bigquery: {error}")));
            }
            debug!(project = %self.project_id, "BigQuery query complete");
            return Ok(payload);
        }
    }

    fn decode_rows(payload: &Value) -> Vec<SqlRow> {
        let fields: Vec<(String, String)> = payload["schema"]["fields"]
            .as_array()
            .map(|fs| {
                fs.iter()
                    .map(|f| {
                        (
                            f["name"].as_str().unwrap_or_default().to_string(),
                            f["type"].as_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        payload["rows"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        let cells = row["f"].as_array().cloned().unwrap_or_default();
                        let mut out = SqlRow::default();
                        for (i, (name, ty)) in fields.iter().enumerate() {
                            let raw = cells.get(i).map(|c| c["v"].clone()).unwrap_or(Value::Null);
                            out.columns.push(name.clone());
                            out.values.push(Self::decode_cell(&raw, ty));
                        }
                        out
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn decode_cell(raw: &Value, ty: &str) -> SqlValue {
        let Some(text) = raw.as_str() else {
            return SqlValue::Null;
        };
        match ty {
            "INT64" | "INTEGER" => text.parse().map(SqlValue::Int).unwrap_or(SqlValue::Null),
            "FLOAT64" | "FLOAT" => text.parse().map(SqlValue::Float).unwrap_or(SqlValue::Null),
            "BOOL" | "BOOLEAN" => SqlValue::Bool(text == "true"),
            "JSON" => serde_json::from_str(text)
                .map(SqlValue::Json)
                .unwrap_or_else(|_| SqlValue::Text(text.to_string())),
            _ => SqlValue::Text(text.to_string()),
        }
    }
}

#[async_trait]
impl SqlExecutor for BigQueryExecutor {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let payload = self.run(sql, params).await?;
        Ok(payload["numDmlAffectedRows"]
            .as_str()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let payload = self.run(sql, params).await?;
        Ok(Self::decode_rows(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parameter_shapes() {
        let p = BigQueryExecutor::query_parameter(0, &SqlValue::Int(42));
        assert_eq!(p["name"], "p1");
        assert_eq!(p["parameterType"]["type"], "INT64");
        assert_eq!(p["parameterValue"]["value"], "42");

        let n = BigQueryExecutor::query_parameter(2, &SqlValue::Null);
        assert_eq!(n["name"], "p3");
        assert!(n["parameterValue"]["value"].is_null());
    }

    #[test]
    fn test_decode_rows_by_field_type() {
        let payload = json!({
            "schema": {"fields": [
                {"name": "hlc", "type": "INT64"},
                {"name": "op", "type": "STRING"},
                {"name": "columns", "type": "JSON"},
            ]},
            "rows": [
                {"f": [{"v": "6553600"}, {"v": "INSERT"}, {"v": "[{\"column\":\"a\"}]"}]},
            ],
        });
        let rows = BigQueryExecutor::decode_rows(&payload);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].require_i64("hlc").unwrap(), 6_553_600);
        assert_eq!(rows[0].require_str("op").unwrap(), "INSERT");
        assert!(matches!(rows[0].get("columns"), Some(SqlValue::Json(_))));
    }
}
