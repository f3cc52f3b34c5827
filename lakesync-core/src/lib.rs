//! # LakeSync Core
//!
//! The delta model at the heart of LakeSync: hybrid logical clocks,
//! content-addressed row deltas, column-level last-writer-wins resolution,
//! and the contracts every sink and source implements.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                lakesync-core                  │
//! ├──────────┬───────────┬────────────────────────┤
//! │   Hlc    │ RowDelta  │  LWW resolve / project │
//! │ HlcClock │ extractor │  apply_remote_deltas   │
//! ├──────────┴───────────┴────────────────────────┤
//! │  Contracts: LakeAdapter · DatabaseAdapter     │
//! │  Materialisable · DeltaSink · SqlExecutor     │
//! │  LocalStore · PendingQueue                    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use lakesync_core::{extract_delta, ExtractContext, HlcClock, Record};
//! use serde_json::json;
//!
//! let clock = HlcClock::system();
//! let before: Record = [("title".to_string(), json!("old"))].into_iter().collect();
//! let after: Record = [("title".to_string(), json!("new"))].into_iter().collect();
//!
//! let ctx = ExtractContext::new("todos", "1", "client-a", clock.now());
//! let delta = extract_delta(Some(&before), Some(&after), &ctx).unwrap();
//! assert_eq!(delta.columns.len(), 1);
//! ```

pub mod adapter;
pub mod auth;
pub mod canonical;
pub mod delta;
pub mod error;
pub mod extract;
pub mod hlc;
pub mod local;
pub mod resolve;
pub mod schema;
pub mod sql;

// Re-exports for convenience
pub use adapter::{DatabaseAdapter, DeltaSink, LakeAdapter, Materialisable};
pub use auth::{sign_token, verify_token, TokenClaims};
pub use canonical::canonical_json;
pub use delta::{compute_delta_id, ColumnDelta, ColumnValue, DeltaOp, RowDelta, ROW_ID_SEPARATOR};
pub use error::{LakeSyncError, Result};
pub use extract::{extract_delta, ExtractContext, Record};
pub use hlc::{Hlc, HlcClock, ManualClock, SystemClock, WallClock, DEFAULT_MAX_DRIFT_MS};
pub use local::{
    apply_remote_deltas, LocalStore, LocalWrite, MemoryLocalStore, MemoryPendingQueue,
    PendingQueue,
};
pub use resolve::{project_row_state, resolve, sort_for_replay, ColumnState};
pub use schema::{ColumnSchema, ColumnType, TableSchema};
pub use sql::{SqlExecutor, SqlRow, SqlValue};
