//! Object-store lake adapter
//!
//! Wraps any [`object_store::ObjectStore`] backend behind the
//! [`LakeAdapter`] contract. Writes retry up to three times with
//! exponential backoff before surfacing an adapter error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tokio::time::sleep;
use tracing::{debug, warn};

use lakesync_core::{LakeAdapter, LakeSyncError, Result};

const MAX_PUT_ATTEMPTS: usize = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 100;

/// Lake adapter over an `object_store` backend
#[derive(Clone)]
pub struct ObjectStoreAdapter {
    store: Arc<dyn ObjectStore>,
    label: String,
}

impl ObjectStoreAdapter {
    pub fn new(store: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self { store, label: label.into() }
    }

    /// Filesystem-backed lake rooted at `path`
    pub fn local(path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let store = LocalFileSystem::new_with_prefix(path)
            .map_err(|e| LakeSyncError::Config(format!("invalid lake path: {e}")))?;
        Ok(Self::new(Arc::new(store), format!("file://{}", path.display())))
    }

    /// In-memory lake for tests and dry runs
    pub fn memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory://")
    }

    fn object_path(key: &str) -> Result<ObjectPath> {
        ObjectPath::parse(key)
            .map_err(|e| LakeSyncError::Config(format!("invalid object key '{key}': {e}")))
    }
}

#[async_trait]
impl LakeAdapter for ObjectStoreAdapter {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = Self::object_path(key)?;
        let size = bytes.len();
        let payload = PutPayload::from(bytes);

        let mut delay = INITIAL_RETRY_DELAY_MS;
        let mut last_err = None;
        for attempt in 1..=MAX_PUT_ATTEMPTS {
            match self.store.put(&path, payload.clone()).await {
                Ok(_) => {
                    debug!(store = %self.label, key, size, "Object written");
                    return Ok(());
                }
                Err(e) => {
                    warn!(store = %self.label, key, attempt, error = %e, "Object write failed");
                    last_err = Some(e);
                    if attempt < MAX_PUT_ATTEMPTS {
                        sleep(Duration::from_millis(delay)).await;
                        delay *= 2;
                    }
                }
            }
        }
        Err(LakeSyncError::AdapterError(format!(
            "put '{key}' failed after {MAX_PUT_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = Self::object_path(key)?;
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| LakeSyncError::AdapterError(format!("get '{key}': {e}")))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| LakeSyncError::AdapterError(format!("read '{key}': {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let path = Self::object_path(prefix)?;
        let mut keys: Vec<String> = self
            .store
            .list(Some(&path))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .map_err(|e| LakeSyncError::AdapterError(format!("list '{prefix}': {e}")))?;
        keys.sort();
        Ok(keys)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let path = Self::object_path(key)?;
        self.store
            .delete(&path)
            .await
            .map_err(|e| LakeSyncError::AdapterError(format!("delete '{key}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let adapter = ObjectStoreAdapter::memory();
        adapter.put_object("deltas/gw/1-a.json", b"payload".to_vec()).await.unwrap();
        let back = adapter.get_object("deltas/gw/1-a.json").await.unwrap();
        assert_eq!(back, b"payload");
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_scoped() {
        let adapter = ObjectStoreAdapter::memory();
        adapter.put_object("deltas/gw/2-b.json", vec![1]).await.unwrap();
        adapter.put_object("deltas/gw/1-a.json", vec![2]).await.unwrap();
        adapter.put_object("materialised/t/current.parquet", vec![3]).await.unwrap();

        let keys = adapter.list_objects("deltas/gw").await.unwrap();
        assert_eq!(keys, vec!["deltas/gw/1-a.json", "deltas/gw/2-b.json"]);
    }

    #[tokio::test]
    async fn test_get_missing_is_adapter_error() {
        let adapter = ObjectStoreAdapter::memory();
        let err = adapter.get_object("deltas/none").await.unwrap_err();
        assert_eq!(err.code(), "ADAPTER_ERROR");
    }

    #[tokio::test]
    async fn test_local_filesystem_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let adapter = ObjectStoreAdapter::local(dir.path()).unwrap();
        adapter.put_object("a/b.bin", vec![9, 9]).await.unwrap();
        assert_eq!(adapter.get_object("a/b.bin").await.unwrap(), vec![9, 9]);
        adapter.delete_object("a/b.bin").await.unwrap();
        assert!(adapter.get_object("a/b.bin").await.is_err());
    }
}
