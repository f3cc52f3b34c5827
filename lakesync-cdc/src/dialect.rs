//! CDC dialect contract
//!
//! A dialect turns one engine's change log into [`CdcRawChange`]s and an
//! opaque resume cursor. The polling source is engine-agnostic: it drives
//! any dialect through this contract and converts raw changes to row deltas.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lakesync_core::{ColumnDelta, DeltaOp, Result, TableSchema};

/// Opaque, JSON-serialisable resume position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CdcCursor {
    /// Log sequence number (Postgres `0/16B3748`, SQL Server hex LSN)
    Lsn { lsn: String },
    /// Autoincrement high-water mark (MySQL changelog)
    LastId {
        #[serde(rename = "lastId")]
        last_id: i64,
    },
    /// REST polling position: timestamp watermark + per-row snapshots
    Poll {
        #[serde(rename = "updatedSince")]
        updated_since: String,
        snapshots: HashMap<String, Value>,
    },
}

impl CdcCursor {
    pub fn lsn(lsn: impl Into<String>) -> Self {
        CdcCursor::Lsn { lsn: lsn.into() }
    }

    pub fn last_id(last_id: i64) -> Self {
        CdcCursor::LastId { last_id }
    }

    pub fn poll_start() -> Self {
        CdcCursor::Poll { updated_since: String::new(), snapshots: HashMap::new() }
    }
}

/// Kind of an upstream row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl From<ChangeKind> for DeltaOp {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Insert => DeltaOp::Insert,
            ChangeKind::Update => DeltaOp::Update,
            ChangeKind::Delete => DeltaOp::Delete,
        }
    }
}

/// One decoded change from an upstream change log
#[derive(Debug, Clone, PartialEq)]
pub struct CdcRawChange {
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    /// Primary key rendering, composite keys colon-joined
    pub row_id: String,
    /// Post-image columns; empty for deletes
    pub columns: Vec<ColumnDelta>,
    /// Upstream commit time in epoch ms, when the log carries one.
    /// Drives deterministic delta HLCs so log replay reproduces delta ids.
    pub captured_at_ms: Option<u64>,
}

/// A fetched slice of the change log plus the cursor to resume after it
#[derive(Debug, Clone)]
pub struct CdcBatch {
    pub changes: Vec<CdcRawChange>,
    pub cursor: CdcCursor,
}

/// Engine-specific change capture
#[async_trait]
pub trait CdcDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open/validate the upstream connection
    async fn connect(&self) -> Result<()>;

    /// Release upstream resources
    async fn close(&self) -> Result<()>;

    /// Idempotent capture setup: slots, triggers, capture instances
    async fn ensure_capture(&self, tables: Option<&[String]>) -> Result<()>;

    /// Changes after `cursor`, plus the next cursor
    async fn fetch_changes(&self, cursor: &CdcCursor) -> Result<CdcBatch>;

    /// Table schemas as the upstream catalog declares them
    async fn discover_schemas(&self, tables: Option<&[String]>) -> Result<Vec<TableSchema>>;

    /// Starting cursor for a fresh source
    fn default_cursor(&self) -> CdcCursor;
}
