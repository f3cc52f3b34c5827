//! Row delta model — content-addressed, immutable descriptions of row changes
//!
//! A [`RowDelta`] is the unit every LakeSync component exchanges: CDC sources
//! and pollers produce them, the gateway buffers them, lake and warehouse
//! adapters persist them, and materialisation replays them. `delta_id` is a
//! SHA-256 over the canonical JSON of the delta's identifying content, so
//! replaying the same upstream change always yields the same id.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::canonical::canonical_json;
use crate::hlc::Hlc;

/// Separator for composite primary-key row ids (`"100:200"`)
pub const ROW_ID_SEPARATOR: char = ':';

/// A column value as it appears on the wire: JSON scalar, JSON blob, or null
///
/// `Null` is a legal post-image value and is distinct from the column being
/// absent from a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Arrays and objects, kept as raw JSON
    Json(Value),
}

impl From<Value> for ColumnValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ColumnValue::Null,
            Value::Bool(b) => ColumnValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ColumnValue::Integer(i)
                } else {
                    ColumnValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => ColumnValue::Text(s),
            other => ColumnValue::Json(other),
        }
    }
}

impl From<ColumnValue> for Value {
    fn from(value: ColumnValue) -> Self {
        match value {
            ColumnValue::Null => Value::Null,
            ColumnValue::Bool(b) => Value::Bool(b),
            ColumnValue::Integer(i) => json!(i),
            ColumnValue::Float(f) => json!(f),
            ColumnValue::Text(s) => Value::String(s),
            ColumnValue::Json(v) => v,
        }
    }
}

impl ColumnValue {
    /// Wire representation as a plain JSON value
    pub fn to_json(&self) -> Value {
        Value::from(self.clone())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

/// One changed column with its post-image value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDelta {
    pub column: String,
    pub value: ColumnValue,
}

impl ColumnDelta {
    pub fn new(column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        Self { column: column.into(), value: value.into() }
    }
}

/// Row mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeltaOp {
    Insert,
    Update,
    Delete,
}

impl DeltaOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaOp::Insert => "INSERT",
            DeltaOp::Update => "UPDATE",
            DeltaOp::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(DeltaOp::Insert),
            "UPDATE" => Some(DeltaOp::Update),
            "DELETE" => Some(DeltaOp::Delete),
            _ => None,
        }
    }
}

/// Immutable, content-addressed description of a change to one row
///
/// Wire field names are camelCase to match the gateway protocol and the
/// Parquet delta layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDelta {
    /// 64-hex SHA-256 content hash; governs idempotence system-wide
    pub delta_id: String,
    pub op: DeltaOp,
    pub table: String,
    pub row_id: String,
    pub client_id: String,
    pub hlc: Hlc,
    /// Changed columns: empty for DELETE, changed-only for UPDATE,
    /// all non-absent post columns for INSERT
    pub columns: Vec<ColumnDelta>,
}

impl RowDelta {
    /// Build a delta, computing `delta_id` from content
    pub fn new(
        op: DeltaOp,
        table: impl Into<String>,
        row_id: impl Into<String>,
        client_id: impl Into<String>,
        hlc: Hlc,
        columns: Vec<ColumnDelta>,
    ) -> Self {
        let table = table.into();
        let row_id = row_id.into();
        let client_id = client_id.into();
        let delta_id = compute_delta_id(&client_id, hlc, &table, &row_id, &columns);
        Self { delta_id, op, table, row_id, client_id, hlc, columns }
    }

    /// Approximate serialised size, used for buffer byte accounting
    pub fn estimate_bytes(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }

    /// Look up a column's post-image value
    pub fn column(&self, name: &str) -> Option<&ColumnValue> {
        self.columns.iter().find(|c| c.column == name).map(|c| &c.value)
    }
}

/// SHA-256 over canonical JSON of the delta's identifying content
///
/// The hashed document is `{clientId, columns, hlc, rowId, table}` with the
/// HLC rendered as its decimal string and object keys canonically sorted.
pub fn compute_delta_id(
    client_id: &str,
    hlc: Hlc,
    table: &str,
    row_id: &str,
    columns: &[ColumnDelta],
) -> String {
    let columns_json: Vec<Value> = columns
        .iter()
        .map(|c| json!({"column": c.column, "value": c.value.to_json()}))
        .collect();
    let doc = json!({
        "clientId": client_id,
        "hlc": hlc.to_string(),
        "table": table,
        "rowId": row_id,
        "columns": columns_json,
    });
    let canonical = canonical_json(&doc);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}
