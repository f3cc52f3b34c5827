//! Source connector descriptors
//!
//! Operator-facing JSON documents describing where deltas come from. Each
//! descriptor is tagged by `type` and carries per-type connection settings
//! plus optional ingest tuning.

use std::path::Path;

use serde::{Deserialize, Serialize};

use lakesync_core::{LakeSyncError, Result};

/// Ingest tuning knobs shared by all connector types
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_budget_bytes: Option<u64>,
}

/// One configured delta source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SourceConnector {
    PostgresCdc {
        name: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tables: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ingest: Option<IngestSettings>,
    },
    MysqlCdc {
        name: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tables: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ingest: Option<IngestSettings>,
    },
    SqlserverCdc {
        name: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tables: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ingest: Option<IngestSettings>,
    },
    Rest {
        name: String,
        endpoint: String,
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id_field: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_field: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bearer_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        full_snapshot: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ingest: Option<IngestSettings>,
    },
}

impl SourceConnector {
    pub fn name(&self) -> &str {
        match self {
            SourceConnector::PostgresCdc { name, .. }
            | SourceConnector::MysqlCdc { name, .. }
            | SourceConnector::SqlserverCdc { name, .. }
            | SourceConnector::Rest { name, .. } => name,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SourceConnector::PostgresCdc { .. } => "postgres-cdc",
            SourceConnector::MysqlCdc { .. } => "mysql-cdc",
            SourceConnector::SqlserverCdc { .. } => "sqlserver-cdc",
            SourceConnector::Rest { .. } => "rest",
        }
    }

    pub fn ingest(&self) -> Option<&IngestSettings> {
        match self {
            SourceConnector::PostgresCdc { ingest, .. }
            | SourceConnector::MysqlCdc { ingest, .. }
            | SourceConnector::SqlserverCdc { ingest, .. }
            | SourceConnector::Rest { ingest, .. } => ingest.as_ref(),
        }
    }
}

/// Load connector descriptors from a JSON file (an array of descriptors)
pub fn load_connectors(path: &Path) -> Result<Vec<SourceConnector>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        LakeSyncError::Config(format!("cannot read connectors file '{}': {e}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| LakeSyncError::Config(format!("invalid connectors file: {e}")))
}
