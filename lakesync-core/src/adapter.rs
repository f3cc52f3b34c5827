//! Adapter contracts — the boundary between the sync core and its sinks
//!
//! Object stores implement [`LakeAdapter`]; warehouses implement
//! [`DatabaseAdapter`]. Either may additionally be [`Materialisable`],
//! discovered through the explicit `as_materialisable` capability hook
//! rather than downcasting.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::delta::{ColumnValue, RowDelta};
use crate::error::Result;
use crate::hlc::Hlc;
use crate::schema::TableSchema;

/// Projects accumulated deltas into current destination row state
#[async_trait]
pub trait Materialisable: Send + Sync {
    async fn materialise(&self, deltas: &[RowDelta], schemas: &[TableSchema]) -> Result<()>;
}

/// Object-store sink: opaque byte objects under string keys
#[async_trait]
pub trait LakeAdapter: Send + Sync {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Keys under a prefix, lexicographically sorted
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete_object(&self, key: &str) -> Result<()>;

    /// Capability discovery: is this adapter also a materialiser?
    fn as_materialisable(&self) -> Option<&dyn Materialisable> {
        None
    }
}

/// Warehouse deltas-store sink
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Insert deltas, idempotent by `delta_id`; returns newly inserted count
    async fn insert_deltas(&self, deltas: &[RowDelta]) -> Result<usize>;

    /// Deltas with `hlc > since`, ascending by `(hlc, client_id)`,
    /// optionally capped
    async fn query_deltas_since(&self, since: Hlc, limit: Option<usize>) -> Result<Vec<RowDelta>>;

    /// Deltas with `hlc < before`, ascending; feeds age-tier migration
    async fn query_deltas_before(&self, before: Hlc) -> Result<Vec<RowDelta>>;

    /// Current projected state of one row, `None` when absent or tombstoned
    async fn get_latest_state(
        &self,
        table: &str,
        row_id: &str,
    ) -> Result<Option<HashMap<String, ColumnValue>>>;

    async fn close(&self) -> Result<()>;

    fn as_materialisable(&self) -> Option<&dyn Materialisable> {
        None
    }
}

/// Push contract of the sync gateway, as seen by CDC sources and pollers
#[async_trait]
pub trait DeltaSink: Send + Sync {
    /// Push a batch; returns the accepted delta ids
    async fn push(&self, client_id: &str, deltas: Vec<RowDelta>) -> Result<Vec<String>>;
}
