//! # LakeSync Warehouse
//!
//! Warehouse sinks for LakeSync. One `lakesync_deltas` table per warehouse
//! carries the delta stream; materialisation projects it into destination
//! tables through a pluggable SQL dialect.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │               lakesync-warehouse                │
//! ├──────────────┬───────────────┬──────────────────┤
//! │  SqlAdapter  │ Materialise   │ Routing adapters │
//! │ (delta store)│ (upserts +    │ Composite/FanOut │
//! │              │  tombstones)  │ /Lifecycle       │
//! ├──────────────┴───────────────┴──────────────────┤
//! │  SqlDialect: Postgres · MySQL · BigQuery        │
//! ├─────────────────────────────────────────────────┤
//! │  SqlExecutor: sqlx pools · BigQuery REST        │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lakesync_warehouse::{PgExecutor, PostgresDialect, SqlAdapter};
//!
//! # async fn example() -> lakesync_core::Result<()> {
//! let executor = Arc::new(PgExecutor::connect("postgres://localhost/analytics").await?);
//! let adapter = SqlAdapter::connect(executor, Arc::new(PostgresDialect)).await?;
//! # Ok(()) }
//! ```

pub mod composite;
pub mod dialect;
pub mod dialects;
pub mod executor;
pub mod fanout;
pub mod lifecycle;
mod materialise;
pub mod memory;
pub mod migrate;
pub mod sql_adapter;

pub use composite::CompositeAdapter;
pub use dialect::{conflict_column, SqlDialect, DELTAS_TABLE, PROPS_COLUMN};
pub use dialects::{BigQueryDialect, MySqlDialect, PostgresDialect};
pub use executor::{BigQueryExecutor, MySqlExecutor, PgExecutor};
pub use fanout::FanOutAdapter;
pub use lifecycle::LifecycleAdapter;
pub use memory::MemoryAdapter;
pub use migrate::migrate_adapter;
pub use sql_adapter::SqlAdapter;
