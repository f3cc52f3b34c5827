//! Engine-specific [`CdcDialect`](crate::dialect::CdcDialect) implementations

mod mysql;
mod postgres;
mod sqlserver;

pub use mysql::{MySqlCdcDialect, CHANGELOG_TABLE};
pub use postgres::{PostgresCdcDialect, SLOT_NAME};
pub use sqlserver::SqlServerCdcDialect;
