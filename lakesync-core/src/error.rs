//! Error types for LakeSync — Railway Programming
//!
//! All public operations across the workspace return `Result<T, LakeSyncError>`.
//! No panics, no unwraps in production code paths. Every variant that crosses
//! a wire boundary has a stable code string (see [`LakeSyncError::code`]).

use thiserror::Error;

/// Unified error type for all LakeSync operations
#[derive(Error, Debug)]
pub enum LakeSyncError {
    // ─── Protocol Errors ───

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Buffer full: {size_bytes} bytes buffered, hard limit {limit_bytes}")]
    BufferFull { size_bytes: usize, limit_bytes: usize },

    #[error("Row not found: table={table}, row_id={row_id}")]
    RowNotFound { table: String, row_id: String },

    #[error("Failed to apply remote deltas: {0}")]
    ApplyError(String),

    #[error("No sink adapter configured")]
    NoAdapter,

    #[error("Flush failed, buffer restored: {0}")]
    FlushFailed(String),

    #[error("Adapter error: {0}")]
    AdapterError(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Peer clock too far ahead: peer={peer_ms}ms, local={local_ms}ms")]
    ClockDrift { peer_ms: u64, local_ms: u64 },

    #[error("Schema mismatch for {table}: {detail}")]
    SchemaMismatch { table: String, detail: String },

    // ─── Infrastructure Errors ───

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("SQL error: {0}")]
    Sql(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Token invalid: {0}")]
    TokenInvalid(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LakeSyncError {
    /// Stable error code carried on the wire and in CLI output
    pub fn code(&self) -> &'static str {
        match self {
            LakeSyncError::AuthFailed(_) => "AUTH_FAILED",
            LakeSyncError::BufferFull { .. } => "BUFFER_FULL",
            LakeSyncError::RowNotFound { .. } => "ROW_NOT_FOUND",
            LakeSyncError::ApplyError(_) => "APPLY_ERROR",
            LakeSyncError::NoAdapter => "NO_ADAPTER",
            LakeSyncError::FlushFailed(_) => "FLUSH_FAILED",
            LakeSyncError::AdapterError(_) => "ADAPTER_ERROR",
            LakeSyncError::RateLimited { .. } => "RATE_LIMITED",
            LakeSyncError::ClockDrift { .. } => "CLOCK_DRIFT",
            LakeSyncError::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            LakeSyncError::Io(_) => "IO_ERROR",
            LakeSyncError::Serialization(_) => "SERIALIZATION_ERROR",
            LakeSyncError::Parquet(_) => "PARQUET_ERROR",
            LakeSyncError::Arrow(_) => "ARROW_ERROR",
            LakeSyncError::Sql(_) => "SQL_ERROR",
            LakeSyncError::Http(_) => "HTTP_ERROR",
            LakeSyncError::TokenInvalid(_) => "TOKEN_INVALID",
            LakeSyncError::Config(_) => "CONFIG_ERROR",
            LakeSyncError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for LakeSyncError {
    fn from(err: serde_json::Error) -> Self {
        LakeSyncError::Serialization(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for LakeSyncError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        LakeSyncError::TokenInvalid(err.to_string())
    }
}

/// Result type alias for LakeSync operations
pub type Result<T> = std::result::Result<T, LakeSyncError>;
