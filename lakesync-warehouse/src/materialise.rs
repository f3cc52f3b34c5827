//! Shared materialisation framework
//!
//! One algorithm, every dialect: group the batch by source table, replay the
//! full delta history of the affected rows, and emit upserts for surviving
//! rows and (soft-)deletes for tombstones. The `props` column belongs to the
//! destination's consumers — it is seeded `'{}'` on insert and never updated.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use lakesync_core::{
    project_row_state, sort_for_replay, ColumnType, ColumnValue, Result, RowDelta, SqlValue,
    TableSchema,
};

use crate::dialect::conflict_column;
use crate::sql_adapter::SqlAdapter;

/// Materialise a delta batch into destination tables through a [`SqlAdapter`]
pub(crate) async fn materialise_sql(
    adapter: &SqlAdapter,
    deltas: &[RowDelta],
    schemas: &[TableSchema],
) -> Result<()> {
    if deltas.is_empty() {
        return Ok(());
    }

    let executor = adapter.executor().clone();
    let dialect = adapter.dialect().clone();

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

        for stmt in dialect.create_destination_table_sql(schema) {
            executor.execute(&stmt, &[]).await?;
        }

        // Replay the stored history merged with the in-flight batch so a
        // fresh destination converges even when the batch is a tail.
        let row_ids: Vec<String> = group
            .iter()
            .map(|d| d.row_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut history = adapter.query_history(source_table, &row_ids).await?;
        for delta in &group {
            if !history.iter().any(|h| h.delta_id == delta.delta_id) {
                history.push((*delta).clone());
            }
        }

        let mut by_row: BTreeMap<&str, Vec<RowDelta>> = BTreeMap::new();
        for delta in &history {
            by_row.entry(delta.row_id.as_str()).or_default().push(delta.clone());
        }

        let mut upserts = 0usize;
        let mut tombstones = 0usize;
        let conflict = conflict_column(schema);

        for (row_id, mut row_history) in by_row {
            sort_for_replay(&mut row_history);
            match project_row_state(&row_history) {
                Some(state) => {
                    let sql = dialect.upsert_sql(schema, conflict);
                    let mut params = vec![SqlValue::Text(row_id.to_string())];
                    for col in &schema.columns {
                        params.push(typed_param(
                            state.get(&col.name),
                            col.column_type,
                            dialect.as_ref(),
                        ));
                    }
                    executor.execute(&sql, &params).await?;
                    upserts += 1;
                }
                None => {
                    let sql = if schema.soft_delete_enabled() {
                        dialect.soft_delete_sql(schema)
                    } else {
                        dialect.delete_sql(schema)
                    };
                    executor.execute(&sql, &[SqlValue::Text(row_id.to_string())]).await?;
                    tombstones += 1;
                }
            }
        }

        info!(
            table = %schema.table,
            source = source_table,
            upserts,
            tombstones,
            "Materialised table"
        );
    }
    Ok(())
}

/// Convert a projected column value into a bound parameter of the schema type
fn typed_param(
    value: Option<&ColumnValue>,
    column_type: ColumnType,
    dialect: &dyn crate::dialect::SqlDialect,
) -> SqlValue {
    let Some(value) = value else {
        return SqlValue::Null;
    };
    match (column_type, value) {
        (_, ColumnValue::Null) => SqlValue::Null,
        (ColumnType::Boolean, ColumnValue::Bool(b)) => SqlValue::Bool(*b),
        (ColumnType::Boolean, ColumnValue::Integer(i)) => SqlValue::Bool(*i != 0),
        (ColumnType::Number, ColumnValue::Integer(i)) => SqlValue::Int(*i),
        (ColumnType::Number, ColumnValue::Float(f)) => SqlValue::Float(*f),
        (ColumnType::Json, other) => dialect.json_param(&other.to_json()),
        (ColumnType::String | ColumnType::Null, ColumnValue::Text(s)) => {
            SqlValue::Text(s.clone())
        }
        // Type drift between schema and data: store the JSON rendering.
        (_, other) => SqlValue::Text(other.to_json().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::PostgresDialect;
    use serde_json::json;

    #[test]
    fn test_typed_param_mapping() {
        let d = PostgresDialect;
        assert_eq!(typed_param(None, ColumnType::String, &d), SqlValue::Null);
        assert_eq!(
            typed_param(Some(&ColumnValue::Bool(true)), ColumnType::Boolean, &d),
            SqlValue::Bool(true)
        );
        assert_eq!(
            typed_param(Some(&ColumnValue::Integer(1)), ColumnType::Boolean, &d),
            SqlValue::Bool(true)
        );
        assert_eq!(
            typed_param(Some(&ColumnValue::Integer(3)), ColumnType::Number, &d),
            SqlValue::Int(3)
        );
        assert_eq!(
            typed_param(Some(&ColumnValue::Json(json!({"k": 1}))), ColumnType::Json, &d),
            SqlValue::Json(json!({"k": 1}))
        );
        // Schema says number but the data is text: fall back to its JSON form.
        assert_eq!(
            typed_param(Some(&ColumnValue::Text("x".into())), ColumnType::Number, &d),
            SqlValue::Text("\"x\"".into())
        );
    }
}
