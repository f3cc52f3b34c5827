//! Parquet delta codec — one row per [`RowDelta`], Snappy-compressed
//!
//! Layout (column names match the gateway wire format):
//!
//! | column   | type  |                          |
//! |----------|-------|--------------------------|
//! | deltaId  | utf8  | content hash             |
//! | op       | utf8  | INSERT / UPDATE / DELETE |
//! | table    | utf8  |                          |
//! | rowId    | utf8  |                          |
//! | clientId | utf8  |                          |
//! | hlc      | int64 | packed 64-bit HLC        |
//! | columns  | utf8  | canonical JSON array     |
//!
//! Decoding restores deltas that compare equal to the originals, so a
//! flushed object can be replayed into any adapter without re-hashing.

use std::sync::Arc;

use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use lakesync_core::{
    canonical_json, ColumnDelta, DeltaOp, Hlc, LakeSyncError, Result, RowDelta,
};

/// Arrow schema of a delta batch
pub fn delta_arrow_schema() -> Schema {
    Schema::new(vec![
        Field::new("deltaId", DataType::Utf8, false),
        Field::new("op", DataType::Utf8, false),
        Field::new("table", DataType::Utf8, false),
        Field::new("rowId", DataType::Utf8, false),
        Field::new("clientId", DataType::Utf8, false),
        Field::new("hlc", DataType::Int64, false),
        Field::new("columns", DataType::Utf8, false),
    ])
}

/// Serialise a batch of deltas to Snappy-Parquet bytes
pub fn write_deltas_to_parquet(deltas: &[RowDelta]) -> Result<Vec<u8>> {
    let schema = Arc::new(delta_arrow_schema());

    let columns_json: Vec<String> = deltas
        .iter()
        .map(|d| {
            let arr = serde_json::Value::Array(
                d.columns
                    .iter()
                    .map(|c| serde_json::json!({"column": c.column, "value": c.value.to_json()}))
                    .collect(),
            );
            canonical_json(&arr)
        })
        .collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from_iter_values(deltas.iter().map(|d| d.delta_id.as_str())))
                as ArrayRef,
            Arc::new(StringArray::from_iter_values(deltas.iter().map(|d| d.op.as_str()))),
            Arc::new(StringArray::from_iter_values(deltas.iter().map(|d| d.table.as_str()))),
            Arc::new(StringArray::from_iter_values(deltas.iter().map(|d| d.row_id.as_str()))),
            Arc::new(StringArray::from_iter_values(deltas.iter().map(|d| d.client_id.as_str()))),
            Arc::new(Int64Array::from_iter_values(
                deltas.iter().map(|d| d.hlc.as_u64() as i64),
            )),
            Arc::new(StringArray::from_iter_values(columns_json.iter().map(String::as_str))),
        ],
    )
    .map_err(|e| LakeSyncError::Arrow(e.to_string()))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))
        .map_err(|e| LakeSyncError::Parquet(e.to_string()))?;
    writer.write(&batch).map_err(|e| LakeSyncError::Parquet(e.to_string()))?;
    writer.close().map_err(|e| LakeSyncError::Parquet(e.to_string()))?;

    Ok(buf)
}

/// Decode a Parquet object back into deltas
pub fn read_parquet_to_deltas(bytes: &[u8]) -> Result<Vec<RowDelta>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(bytes))
        .map_err(|e| LakeSyncError::Parquet(e.to_string()))?
        .build()
        .map_err(|e| LakeSyncError::Parquet(e.to_string()))?;

    let mut deltas = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| LakeSyncError::Arrow(e.to_string()))?;
        let delta_id = string_column(&batch, "deltaId")?;
        let op = string_column(&batch, "op")?;
        let table = string_column(&batch, "table")?;
        let row_id = string_column(&batch, "rowId")?;
        let client_id = string_column(&batch, "clientId")?;
        let hlc = int64_column(&batch, "hlc")?;
        let columns = string_column(&batch, "columns")?;

        for i in 0..batch.num_rows() {
            let parsed: serde_json::Value = serde_json::from_str(columns.value(i))?;
            let cols = parsed
                .as_array()
                .ok_or_else(|| {
                    LakeSyncError::Serialization("columns cell is not a JSON array".into())
                })?
                .iter()
                .map(|entry| {
                    let column = entry["column"]
                        .as_str()
                        .ok_or_else(|| {
                            LakeSyncError::Serialization("column entry missing name".into())
                        })?
                        .to_string();
                    Ok(ColumnDelta::new(column, entry["value"].clone()))
                })
                .collect::<Result<Vec<_>>>()?;

            let op = DeltaOp::parse(op.value(i)).ok_or_else(|| {
                LakeSyncError::Serialization(format!("unknown op '{}'", op.value(i)))
            })?;

            deltas.push(RowDelta {
                delta_id: delta_id.value(i).to_string(),
                op,
                table: table.value(i).to_string(),
                row_id: row_id.value(i).to_string(),
                client_id: client_id.value(i).to_string(),
                hlc: Hlc::from_u64(hlc.value(i) as u64),
                columns: cols,
            });
        }
    }
    Ok(deltas)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| LakeSyncError::Parquet(format!("missing utf8 column '{name}'")))
}

fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| LakeSyncError::Parquet(format!("missing int64 column '{name}'")))
}
