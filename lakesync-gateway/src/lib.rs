//! # LakeSync Gateway
//!
//! The sync gateway accepts streams of row deltas from many clients at once,
//! resolves conflicts column-by-column with HLC last-writer-wins, buffers
//! bounded by bytes and age, and flushes batches to a lake adapter.
//!
//! ## Architecture
//!
//! ```text
//! clients ──POST /push──▶ ┌───────────────────────────┐
//! CDC sources ──────────▶ │        SyncGateway        │
//!                         │  GatewayBuffer (log+index)│
//! clients ◀──POST /pull── │  flush trigger (size/age) │
//!                         └──────────┬────────────────┘
//!                                    ▼ flush
//!                     deltas/<gw>/<wall>-<id>.parquet|.json
//!                                    ▼ (if materialisable)
//!                      materialised/<table>/current.parquet
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lakesync_gateway::{GatewayConfig, SyncGateway};
//! use lakesync_lake::ParquetLake;
//!
//! # fn example() -> lakesync_core::Result<()> {
//! let gateway = SyncGateway::builder(GatewayConfig::new("gw-1").with_jwt_secret("secret"))
//!     .with_lake(Arc::new(ParquetLake::memory()))
//!     .start()?;
//! # Ok(()) }
//! ```

pub mod buffer;
pub mod config;
pub mod gateway;
pub mod http;

pub use buffer::{AppendOutcome, BufferSnapshot, BufferStats, GatewayBuffer};
pub use config::{FlushFormat, GatewayConfig};
pub use gateway::{
    FlushReport, GatewayBuilder, PullRequest, PullResponse, PushRequest, PushResponse,
    SyncGateway,
};
pub use http::{router, serve};
