//! # LakeSync CDC
//!
//! Delta sources: change-data-capture dialects for Postgres, MySQL, and SQL
//! Server, plus a REST poller for API upstreams without a change log. Every
//! source pushes [`RowDelta`](lakesync_core::RowDelta)s through the
//! gateway's [`DeltaSink`](lakesync_core::DeltaSink) contract.
//!
//! ## Data flow
//!
//! ```text
//! upstream log ──▶ CdcDialect.fetch_changes ──▶ CdcRawChange
//!                                   │
//!                    CdcSource (interval task, cursor)
//!                                   │
//!                        convert_changes (one HLC base)
//!                                   ▼
//!                           DeltaSink.push
//! ```

pub mod connector;
pub mod dialect;
pub mod dialects;
pub mod poller;
pub mod source;

pub use connector::{load_connectors, IngestSettings, SourceConnector};
pub use dialect::{CdcBatch, CdcCursor, CdcDialect, CdcRawChange, ChangeKind};
pub use dialects::{
    MySqlCdcDialect, PostgresCdcDialect, SqlServerCdcDialect, CHANGELOG_TABLE, SLOT_NAME,
};
pub use poller::{RestPoller, RestPollerConfig, RunningPoller};
pub use source::{convert_changes, CdcSource, CdcSourceConfig, DEFAULT_POLL_INTERVAL_MS};
