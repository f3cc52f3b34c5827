//! Parquet state materialiser — current row state for lake-only targets
//!
//! Projects a delta batch into per-table `current.parquet` objects under a
//! prefix. Booleans are encoded as int8 (1/0/null) with the affected column
//! names recorded in Parquet metadata under `lakesync:bool_columns`; JSON
//! values are stored as UTF-8 strings; the row's high-water HLC is an int64.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, Int8Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use tracing::{debug, info};

use lakesync_core::{
    canonical_json, project_row_state, sort_for_replay, ColumnType, ColumnValue, Hlc, LakeAdapter,
    LakeSyncError, Materialisable, Result, RowDelta, TableSchema,
};

/// Parquet metadata key listing int8-encoded boolean columns
pub const BOOL_COLUMNS_METADATA_KEY: &str = "lakesync:bool_columns";

/// Default object prefix for materialised state
pub const DEFAULT_STATE_PREFIX: &str = "materialised";

/// Current state of one materialised row
#[derive(Debug, Clone, PartialEq)]
pub struct StateRow {
    pub row_id: String,
    pub columns: HashMap<String, ColumnValue>,
    pub hlc: Hlc,
}

/// Writes per-table `current.parquet` state objects through a [`LakeAdapter`]
pub struct ParquetMaterialiser<A> {
    adapter: A,
    prefix: String,
}

impl<A: LakeAdapter> ParquetMaterialiser<A> {
    pub fn new(adapter: A) -> Self {
        Self { adapter, prefix: DEFAULT_STATE_PREFIX.to_string() }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    fn state_key(&self, table: &str) -> String {
        format!("{}/{table}/current.parquet", self.prefix)
    }

    /// Read a table's current state back, decoding booleans and JSON per schema
    pub async fn read_state(&self, schema: &TableSchema) -> Result<Vec<StateRow>> {
        let bytes = self.adapter.get_object(&self.state_key(&schema.table)).await?;
        decode_state(&bytes, schema)
    }
}

#[async_trait::async_trait]
impl<A: LakeAdapter> Materialisable for ParquetMaterialiser<A> {
    async fn materialise(&self, deltas: &[RowDelta], schemas: &[TableSchema]) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }

        let schemas_by_source: HashMap<&str, &TableSchema> =
            schemas.iter().map(|s| (s.source_name(), s)).collect();

        let mut grouped: BTreeMap<&str, Vec<&RowDelta>> = BTreeMap::new();
        for delta in deltas {
            grouped.entry(delta.table.as_str()).or_default().push(delta);
        }

        for (source_table, group) in grouped {
            let Some(schema) = schemas_by_source.get(source_table) else {
                debug!(table = source_table, "No schema for table, skipping materialisation");
                continue;
            };

            let rows = merge_current_state(&group);
            if rows.is_empty() {
                debug!(table = %schema.table, "No surviving rows, skipping state write");
                continue;
            }

            let bytes = encode_state(&rows, schema)?;
            let key = self.state_key(&schema.table);
            self.adapter.put_object(&key, bytes).await?;
            info!(table = %schema.table, rows = rows.len(), key, "Materialised current state");
        }
        Ok(())
    }
}

/// Merge a table's deltas into surviving row state, tombstones dropped
fn merge_current_state(group: &[&RowDelta]) -> Vec<StateRow> {
    let mut by_row: BTreeMap<&str, Vec<RowDelta>> = BTreeMap::new();
    for delta in group {
        by_row.entry(delta.row_id.as_str()).or_default().push((*delta).clone());
    }

    let mut rows = Vec::new();
    for (row_id, mut history) in by_row {
        sort_for_replay(&mut history);
        let hlc = history.last().map(|d| d.hlc).unwrap_or_default();
        if let Some(columns) = project_row_state(&history) {
            rows.push(StateRow { row_id: row_id.to_string(), columns, hlc });
        }
    }
    rows
}

fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Number => DataType::Float64,
        ColumnType::Boolean => DataType::Int8,
        ColumnType::String | ColumnType::Json | ColumnType::Null => DataType::Utf8,
    }
}

fn encode_state(rows: &[StateRow], schema: &TableSchema) -> Result<Vec<u8>> {
    let mut fields = vec![Field::new("row_id", DataType::Utf8, false)];
    for col in &schema.columns {
        fields.push(Field::new(&col.name, arrow_type(col.column_type), true));
    }
    fields.push(Field::new("hlc", DataType::Int64, false));
    let arrow_schema = Arc::new(Schema::new(fields));

    let mut arrays: Vec<ArrayRef> =
        vec![Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.row_id.as_str())))];

    for col in &schema.columns {
        let values = rows.iter().map(|r| r.columns.get(&col.name));
        let array: ArrayRef = match col.column_type {
            ColumnType::Number => Arc::new(
                values
                    .map(|v| match v {
                        Some(ColumnValue::Integer(i)) => Some(*i as f64),
                        Some(ColumnValue::Float(f)) => Some(*f),
                        _ => None,
                    })
                    .collect::<Float64Array>(),
            ),
            ColumnType::Boolean => Arc::new(
                values
                    .map(|v| match v {
                        Some(ColumnValue::Bool(b)) => Some(i8::from(*b)),
                        Some(ColumnValue::Integer(i)) => Some(i8::from(*i != 0)),
                        _ => None,
                    })
                    .collect::<Int8Array>(),
            ),
            ColumnType::Json => Arc::new(
                values
                    .map(|v| match v {
                        None | Some(ColumnValue::Null) => None,
                        Some(other) => Some(canonical_json(&other.to_json())),
                    })
                    .collect::<StringArray>(),
            ),
            ColumnType::String | ColumnType::Null => Arc::new(
                values
                    .map(|v| match v {
                        Some(ColumnValue::Text(s)) => Some(s.clone()),
                        None | Some(ColumnValue::Null) => None,
                        Some(other) => Some(canonical_json(&other.to_json())),
                    })
                    .collect::<StringArray>(),
            ),
        };
        arrays.push(array);
    }
    arrays.push(Arc::new(Int64Array::from_iter_values(
        rows.iter().map(|r| r.hlc.as_u64() as i64),
    )));

    let batch = RecordBatch::try_new(arrow_schema.clone(), arrays)
        .map_err(|e| LakeSyncError::Arrow(e.to_string()))?;

    let bool_columns: Vec<&str> = schema
        .columns
        .iter()
        .filter(|c| c.column_type == ColumnType::Boolean)
        .map(|c| c.name.as_str())
        .collect();
    let metadata = KeyValue::new(
        BOOL_COLUMNS_METADATA_KEY.to_string(),
        serde_json::to_string(&bool_columns)?,
    );

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(vec![metadata]))
        .build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, arrow_schema, Some(props))
        .map_err(|e| LakeSyncError::Parquet(e.to_string()))?;
    writer.write(&batch).map_err(|e| LakeSyncError::Parquet(e.to_string()))?;
    writer.close().map_err(|e| LakeSyncError::Parquet(e.to_string()))?;
    Ok(buf)
}

fn decode_state(bytes: &[u8], schema: &TableSchema) -> Result<Vec<StateRow>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(bytes))
        .map_err(|e| LakeSyncError::Parquet(e.to_string()))?;

    let bool_columns: Vec<String> = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|kvs| {
            kvs.iter()
                .find(|kv| kv.key == BOOL_COLUMNS_METADATA_KEY)
                .and_then(|kv| kv.value.as_deref())
                .and_then(|v| serde_json::from_str(v).ok())
        })
        .unwrap_or_default();

    let reader = builder.build().map_err(|e| LakeSyncError::Parquet(e.to_string()))?;
    let mut rows = Vec::new();

    for batch in reader {
        let batch = batch.map_err(|e| LakeSyncError::Arrow(e.to_string()))?;
        let row_ids = batch
            .column_by_name("row_id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| LakeSyncError::Parquet("missing row_id column".into()))?;
        let hlcs = batch
            .column_by_name("hlc")
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
            .ok_or_else(|| LakeSyncError::Parquet("missing hlc column".into()))?;

        for i in 0..batch.num_rows() {
            let mut columns = HashMap::new();
            for col in &schema.columns {
                // Every schema column is written on encode; absence means the
                // file came from a different schema revision.
                let Some(array) = batch.column_by_name(&col.name) else {
                    return Err(LakeSyncError::SchemaMismatch {
                        table: schema.table.clone(),
                        detail: format!("state file lacks column '{}'", col.name),
                    });
                };
                if array.is_null(i) {
                    columns.insert(col.name.clone(), ColumnValue::Null);
                    continue;
                }
                // Metadata wins over the schema for boolean decoding: it records
                // exactly which columns this file wrote as int8.
                let column_type = if bool_columns.iter().any(|c| c == &col.name) {
                    ColumnType::Boolean
                } else {
                    col.column_type
                };
                let value = match column_type {
                    ColumnType::Number => array
                        .as_any()
                        .downcast_ref::<Float64Array>()
                        .map(|a| {
                            let f = a.value(i);
                            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                                ColumnValue::Integer(f as i64)
                            } else {
                                ColumnValue::Float(f)
                            }
                        }),
                    ColumnType::Boolean => array
                        .as_any()
                        .downcast_ref::<Int8Array>()
                        .map(|a| ColumnValue::Bool(a.value(i) != 0)),
                    ColumnType::Json => array
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .map(|a| match serde_json::from_str::<serde_json::Value>(a.value(i)) {
                            Ok(v) => ColumnValue::from(v),
                            Err(_) => ColumnValue::Text(a.value(i).to_string()),
                        }),
                    ColumnType::String | ColumnType::Null => array
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .map(|a| ColumnValue::Text(a.value(i).to_string())),
                };
                if let Some(value) = value {
                    columns.insert(col.name.clone(), value);
                }
            }
            rows.push(StateRow {
                row_id: row_ids.value(i).to_string(),
                columns,
                hlc: Hlc::from_u64(hlcs.value(i) as u64),
            });
        }
    }
    Ok(rows)
}
