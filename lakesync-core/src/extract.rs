//! Delta extraction — diff a before/after record pair into column changes
//!
//! The extractor is a pure function: trackers and pollers feed it row images
//! and it yields the minimal [`RowDelta`] (or none at all), with `delta_id`
//! derived from content so re-extraction of the same change is idempotent.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::delta::{ColumnDelta, ColumnValue, DeltaOp, RowDelta};
use crate::hlc::Hlc;

/// A row image at the wire boundary: column name → JSON value
pub type Record = BTreeMap<String, Value>;

/// Identity of the change being extracted
#[derive(Debug, Clone)]
pub struct ExtractContext {
    pub table: String,
    pub row_id: String,
    pub client_id: String,
    pub hlc: Hlc,
}

impl ExtractContext {
    pub fn new(
        table: impl Into<String>,
        row_id: impl Into<String>,
        client_id: impl Into<String>,
        hlc: Hlc,
    ) -> Self {
        Self {
            table: table.into(),
            row_id: row_id.into(),
            client_id: client_id.into(),
            hlc,
        }
    }
}

/// Diff a before/after pair into a delta
///
/// - both absent → `None`
/// - insert → every field of `after` (nulls included)
/// - delete → empty column list
/// - update → columns whose value differs by deep structural equality;
///   no differences → `None`
pub fn extract_delta(before: Option<&Record>, after: Option<&Record>, ctx: &ExtractContext) -> Option<RowDelta> {
    match (before, after) {
        (None, None) => None,
        (None, Some(after)) => {
            let columns = after
                .iter()
                .map(|(name, value)| ColumnDelta::new(name.clone(), value.clone()))
                .collect();
            Some(build(DeltaOp::Insert, ctx, columns))
        }
        (Some(_), None) => Some(build(DeltaOp::Delete, ctx, Vec::new())),
        (Some(before), Some(after)) => {
            let mut columns = Vec::new();
            for (name, value) in after {
                if before.get(name) != Some(value) {
                    columns.push(ColumnDelta::new(name.clone(), value.clone()));
                }
            }
            // A column dropped from the post-image becomes an explicit null.
            for name in before.keys() {
                if !after.contains_key(name) {
                    columns.push(ColumnDelta::new(name.clone(), ColumnValue::Null));
                }
            }
            if columns.is_empty() {
                None
            } else {
                Some(build(DeltaOp::Update, ctx, columns))
            }
        }
    }
}

fn build(op: DeltaOp, ctx: &ExtractContext, columns: Vec<ColumnDelta>) -> RowDelta {
    RowDelta::new(op, ctx.table.clone(), ctx.row_id.clone(), ctx.client_id.clone(), ctx.hlc, columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn ctx() -> ExtractContext {
        ExtractContext::new("todos", "1", "client-a", Hlc::encode(1000, 0))
    }

    #[test]
    fn test_both_absent_is_noop() {
        assert!(extract_delta(None, None, &ctx()).is_none());
    }

    #[test]
    fn test_insert_includes_nulls() {
        let after = record(&[("title", json!("x")), ("note", Value::Null)]);
        let delta = extract_delta(None, Some(&after), &ctx()).unwrap();
        assert_eq!(delta.op, DeltaOp::Insert);
        assert_eq!(delta.columns.len(), 2);
        assert!(delta.column("note").unwrap().is_null());
    }

    #[test]
    fn test_delete_has_empty_columns() {
        let before = record(&[("title", json!("x"))]);
        let delta = extract_delta(Some(&before), None, &ctx()).unwrap();
        assert_eq!(delta.op, DeltaOp::Delete);
        assert!(delta.columns.is_empty());
    }

    #[test]
    fn test_update_only_changed_columns() {
        let before = record(&[("title", json!("x")), ("done", json!(false))]);
        let after = record(&[("title", json!("y")), ("done", json!(false))]);
        let delta = extract_delta(Some(&before), Some(&after), &ctx()).unwrap();
        assert_eq!(delta.op, DeltaOp::Update);
        assert_eq!(delta.columns.len(), 1);
        assert_eq!(delta.column("title"), Some(&ColumnValue::Text("y".into())));
    }

    #[test]
    fn test_no_difference_is_none() {
        let img = record(&[("title", json!("x")), ("tags", json!(["a", "b"]))]);
        assert!(extract_delta(Some(&img), Some(&img.clone()), &ctx()).is_none());
    }

    #[test]
    fn test_deep_equality_on_json_columns() {
        let before = record(&[("meta", json!({"a": 1, "b": [1, 2]}))]);
        let after = record(&[("meta", json!({"a": 1, "b": [1, 3]}))]);
        let delta = extract_delta(Some(&before), Some(&after), &ctx()).unwrap();
        assert_eq!(delta.columns.len(), 1);
    }

    #[test]
    fn test_dropped_column_becomes_null() {
        let before = record(&[("title", json!("x")), ("note", json!("n"))]);
        let after = record(&[("title", json!("x"))]);
        let delta = extract_delta(Some(&before), Some(&after), &ctx()).unwrap();
        assert_eq!(delta.columns.len(), 1);
        assert!(delta.column("note").unwrap().is_null());
    }

    #[test]
    fn test_re_extraction_is_idempotent() {
        let before = record(&[("title", json!("x"))]);
        let after = record(&[("title", json!("y"))]);
        let a = extract_delta(Some(&before), Some(&after), &ctx()).unwrap();
        let b = extract_delta(Some(&before), Some(&after), &ctx()).unwrap();
        assert_eq!(a.delta_id, b.delta_id);
    }
}
