//! Gateway configuration

use serde::{Deserialize, Serialize};

use lakesync_core::{LakeSyncError, Result, TableSchema};

/// Serialisation of flushed delta batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushFormat {
    Json,
    Parquet,
}

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Authorisation audience: tokens must be scoped to this id
    pub gateway_id: String,

    /// Shared secret for token verification
    pub jwt_secret: String,

    /// Soft limit for the size-based flush trigger
    pub max_buffer_bytes: usize,

    /// Age-based flush trigger, measured from the oldest buffered delta
    pub max_buffer_age_ms: u64,

    pub flush_format: FlushFormat,

    /// Required when `flush_format` is Parquet
    pub table_schemas: Vec<TableSchema>,
}

impl GatewayConfig {
    /// Config with sensible defaults; the secret falls back to
    /// `LAKESYNC_JWT_SECRET`
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            jwt_secret: std::env::var("LAKESYNC_JWT_SECRET")
                .unwrap_or_else(|_| "lakesync-default-secret-change-me".to_string()),
            max_buffer_bytes: 4 * 1024 * 1024,
            max_buffer_age_ms: 30_000,
            flush_format: FlushFormat::Json,
            table_schemas: Vec::new(),
        }
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = secret.into();
        self
    }

    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    pub fn with_max_buffer_age_ms(mut self, age_ms: u64) -> Self {
        self.max_buffer_age_ms = age_ms;
        self
    }

    pub fn with_flush_format(mut self, format: FlushFormat) -> Self {
        self.flush_format = format;
        self
    }

    pub fn with_table_schemas(mut self, schemas: Vec<TableSchema>) -> Self {
        self.table_schemas = schemas;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway_id.is_empty() {
            return Err(LakeSyncError::Config("gateway_id must not be empty".into()));
        }
        if self.max_buffer_bytes == 0 {
            return Err(LakeSyncError::Config("max_buffer_bytes must be positive".into()));
        }
        if self.flush_format == FlushFormat::Parquet && self.table_schemas.is_empty() {
            return Err(LakeSyncError::Config(
                "parquet flush format requires table_schemas".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = GatewayConfig::new("gw-1").with_jwt_secret("secret");
        assert!(config.validate().is_ok());
        assert_eq!(config.flush_format, FlushFormat::Json);
        assert_eq!(config.max_buffer_age_ms, 30_000);
    }

    #[test]
    fn test_parquet_requires_schemas() {
        let config = GatewayConfig::new("gw-1")
            .with_jwt_secret("secret")
            .with_flush_format(FlushFormat::Parquet);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_gateway_id_rejected() {
        assert!(GatewayConfig::new("").with_jwt_secret("s").validate().is_err());
    }
}
