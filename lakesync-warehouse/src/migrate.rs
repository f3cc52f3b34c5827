//! Adapter-to-adapter delta migration
//!
//! Streams the full delta history of one adapter into another in HLC-ordered
//! batches. Inserts are idempotent by `delta_id`, so an interrupted migration
//! can simply be re-run.

use tracing::info;

use lakesync_core::{DatabaseAdapter, Hlc, Result};

/// Copy all deltas from `from` into `to`; returns the newly inserted count
pub async fn migrate_adapter(
    from: &dyn DatabaseAdapter,
    to: &dyn DatabaseAdapter,
    batch_size: usize,
) -> Result<usize> {
    let batch_size = batch_size.max(1);
    let mut cursor = Hlc::ZERO;
    let mut fetch = batch_size;
    let mut total = 0usize;

    loop {
        let batch = from.query_deltas_since(cursor, Some(fetch)).await?;
        let Some(last) = batch.last() else {
            break;
        };
        let last_hlc = last.hlc;
        total += to.insert_deltas(&batch).await?;

        if batch.len() < fetch {
            // Everything past the cursor fit in one window.
            break;
        }
        // A full window may have split an equal-HLC group, so the cursor
        // stops just below the last HLC and the next window re-fetches it;
        // idempotent inserts absorb the overlap. When even that cannot
        // advance, the window widens instead.
        let next = Hlc::from_u64(last_hlc.as_u64().saturating_sub(1));
        if next > cursor {
            cursor = next;
            fetch = batch_size;
        } else {
            fetch *= 2;
        }
    }

    info!(total, "Adapter migration complete");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use lakesync_core::{ColumnDelta, DeltaOp, RowDelta};
    use serde_json::json;

    fn delta(row: &str, hlc: u64, counter: u16) -> RowDelta {
        RowDelta::new(
            DeltaOp::Insert,
            "t",
            row,
            "c",
            Hlc::encode(hlc, counter),
            vec![ColumnDelta::new("a", json!(row))],
        )
    }

    #[tokio::test]
    async fn test_migrates_in_batches() {
        let from = MemoryAdapter::new();
        let to = MemoryAdapter::new();
        let deltas: Vec<RowDelta> =
            (0..25).map(|i| delta(&format!("r{i}"), 100 + i as u64, 0)).collect();
        from.insert_deltas(&deltas).await.unwrap();

        let migrated = migrate_adapter(&from, &to, 10).await.unwrap();
        assert_eq!(migrated, 25);
        assert_eq!(to.delta_count(), 25);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let from = MemoryAdapter::new();
        let to = MemoryAdapter::new();
        from.insert_deltas(&[delta("a", 100, 0), delta("b", 101, 0)]).await.unwrap();

        assert_eq!(migrate_adapter(&from, &to, 1).await.unwrap(), 2);
        assert_eq!(migrate_adapter(&from, &to, 1).await.unwrap(), 0);
        assert_eq!(to.delta_count(), 2);
    }

    #[tokio::test]
    async fn test_equal_hlc_batch_boundary() {
        let from = MemoryAdapter::new();
        let to = MemoryAdapter::new();
        // Five distinct rows at the same packed HLC, batch size below five.
        let deltas: Vec<RowDelta> = (0..5).map(|i| delta(&format!("r{i}"), 100, 0)).collect();
        from.insert_deltas(&deltas).await.unwrap();

        let migrated = migrate_adapter(&from, &to, 2).await.unwrap();
        assert_eq!(migrated, 5);
    }
}
