//! Engine-specific [`SqlDialect`](crate::dialect::SqlDialect) implementations

mod bigquery;
mod mysql;
mod postgres;

pub use bigquery::BigQueryDialect;
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
