//! Lifecycle adapter — hot/cold age tiering

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use lakesync_core::{
    sort_for_replay, ColumnValue, DatabaseAdapter, Hlc, Result, RowDelta, SystemClock, WallClock,
};

/// Writes always land on the hot tier; reads fan out to the cold tier only
/// when the requested range is old enough to live there.
pub struct LifecycleAdapter {
    hot: Arc<dyn DatabaseAdapter>,
    cold: Arc<dyn DatabaseAdapter>,
    max_age_ms: u64,
    clock: Arc<dyn WallClock>,
}

impl LifecycleAdapter {
    pub fn new(
        hot: Arc<dyn DatabaseAdapter>,
        cold: Arc<dyn DatabaseAdapter>,
        max_age_ms: u64,
    ) -> Self {
        Self { hot, cold, max_age_ms, clock: Arc::new(SystemClock) }
    }

    /// Inject a wall clock (tests)
    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    fn tier_boundary(&self) -> Hlc {
        let now = self.clock.now_ms();
        Hlc::encode(now.saturating_sub(self.max_age_ms), 0)
    }

    /// Copy deltas older than the age boundary from hot to cold
    ///
    /// Idempotent: the cold tier deduplicates by `delta_id`. Returns the
    /// number of deltas newly stored cold.
    pub async fn migrate_to_tier(&self) -> Result<usize> {
        let boundary = self.tier_boundary();
        let aged = self.hot.query_deltas_before(boundary).await?;
        if aged.is_empty() {
            return Ok(0);
        }
        let migrated = self.cold.insert_deltas(&aged).await?;
        info!(candidates = aged.len(), migrated, "Age-tier migration complete");
        Ok(migrated)
    }
}

#[async_trait]
impl DatabaseAdapter for LifecycleAdapter {
    async fn insert_deltas(&self, deltas: &[RowDelta]) -> Result<usize> {
        self.hot.insert_deltas(deltas).await
    }

    async fn query_deltas_since(&self, since: Hlc, limit: Option<usize>) -> Result<Vec<RowDelta>> {
        if since >= self.tier_boundary() {
            return self.hot.query_deltas_since(since, limit).await;
        }
        // The range reaches into the cold tier: merge both.
        let mut merged = self.hot.query_deltas_since(since, limit).await?;
        let mut seen: HashSet<String> = merged.iter().map(|d| d.delta_id.clone()).collect();
        for delta in self.cold.query_deltas_since(since, limit).await? {
            if seen.insert(delta.delta_id.clone()) {
                merged.push(delta);
            }
        }
        sort_for_replay(&mut merged);
        if let Some(limit) = limit {
            merged.truncate(limit);
        }
        Ok(merged)
    }

    async fn query_deltas_before(&self, before: Hlc) -> Result<Vec<RowDelta>> {
        let mut merged = self.hot.query_deltas_before(before).await?;
        let mut seen: HashSet<String> = merged.iter().map(|d| d.delta_id.clone()).collect();
        for delta in self.cold.query_deltas_before(before).await? {
            if seen.insert(delta.delta_id.clone()) {
                merged.push(delta);
            }
        }
        sort_for_replay(&mut merged);
        Ok(merged)
    }

    async fn get_latest_state(
        &self,
        table: &str,
        row_id: &str,
    ) -> Result<Option<HashMap<String, ColumnValue>>> {
        match self.hot.get_latest_state(table, row_id).await? {
            Some(state) => Ok(Some(state)),
            None => self.cold.get_latest_state(table, row_id).await,
        }
    }

    async fn close(&self) -> Result<()> {
        self.hot.close().await?;
        self.cold.close().await
    }
}
