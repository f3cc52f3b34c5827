//! # LakeSync Lake
//!
//! Object-store sinks for LakeSync: flushed delta batches land as
//! Snappy-Parquet (or JSON) objects, and an optional materialisation pass
//! keeps one `current.parquet` state object per table.
//!
//! ## Object layout
//!
//! ```text
//! deltas/<gateway_id>/<wall_ms>-<id>.parquet|.json   (flushed batches)
//! materialised/<table>/current.parquet               (projected state)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lakesync_lake::{read_parquet_to_deltas, write_deltas_to_parquet, ParquetLake};
//! use lakesync_core::LakeAdapter;
//!
//! # async fn example(deltas: Vec<lakesync_core::RowDelta>) -> lakesync_core::Result<()> {
//! let lake = ParquetLake::local(std::path::Path::new("/data/lake"))?;
//! let bytes = write_deltas_to_parquet(&deltas)?;
//! lake.put_object("deltas/gw-1/1000-abc.parquet", bytes).await?;
//! # Ok(()) }
//! ```

pub mod codec;
pub mod materialise;
pub mod store;

pub use codec::{delta_arrow_schema, read_parquet_to_deltas, write_deltas_to_parquet};
pub use materialise::{
    ParquetMaterialiser, StateRow, BOOL_COLUMNS_METADATA_KEY, DEFAULT_STATE_PREFIX,
};
pub use store::ObjectStoreAdapter;

use async_trait::async_trait;
use lakesync_core::{LakeAdapter, Materialisable, Result};

/// Object-store lake that also materialises current state
///
/// The delta objects and the state objects share one backend; the gateway
/// discovers the materialisation capability through `as_materialisable`.
pub struct ParquetLake {
    store: ObjectStoreAdapter,
    materialiser: ParquetMaterialiser<ObjectStoreAdapter>,
}

impl ParquetLake {
    pub fn new(store: ObjectStoreAdapter) -> Self {
        let materialiser = ParquetMaterialiser::new(store.clone());
        Self { store, materialiser }
    }

    pub fn local(path: &std::path::Path) -> Result<Self> {
        Ok(Self::new(ObjectStoreAdapter::local(path)?))
    }

    pub fn memory() -> Self {
        Self::new(ObjectStoreAdapter::memory())
    }

    pub fn materialiser(&self) -> &ParquetMaterialiser<ObjectStoreAdapter> {
        &self.materialiser
    }
}

#[async_trait]
impl LakeAdapter for ParquetLake {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.store.put_object(key, bytes).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.store.get_object(key).await
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        self.store.list_objects(prefix).await
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.store.delete_object(key).await
    }

    fn as_materialisable(&self) -> Option<&dyn Materialisable> {
        Some(&self.materialiser)
    }
}
