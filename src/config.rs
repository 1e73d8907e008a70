//! Engine configuration
//!
//! Loaded from a JSON file. Every field has a default, so `{}` is a valid
//! configuration.
//!
//! ```json
//! {
//!   "http": { "host": "0.0.0.0", "port": 8787, "corsOrigins": [] },
//!   "snapshotRetentionDays": 90,
//!   "lineageQueryLimit": 1000,
//!   "logFilter": "promoter=info",
//!   "lineageLogPath": "./lineage.jsonl"
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http_server::HttpServerConfig;
use crate::promotion::{DEFAULT_QUERY_LIMIT, DEFAULT_RETENTION_DAYS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub http: HttpServerConfig,

    /// Days a promotion snapshot stays eligible for rollback
    #[serde(default = "default_snapshot_retention_days")]
    pub snapshot_retention_days: i64,

    /// Cap on organization-wide lineage queries
    #[serde(default = "default_lineage_query_limit")]
    pub lineage_query_limit: usize,

    /// `tracing` filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// JSON lines mirror of committed lineage events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage_log_path: Option<PathBuf>,
}

fn default_snapshot_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}

fn default_lineage_query_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

fn default_log_filter() -> String {
    "promoter=info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http: HttpServerConfig::default(),
            snapshot_retention_days: default_snapshot_retention_days(),
            lineage_query_limit: default_lineage_query_limit(),
            log_filter: default_log_filter(),
            lineage_log_path: None,
        }
    }
}

impl EngineConfig {
    /// Load and validate configuration from file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let config: EngineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.snapshot_retention_days <= 0 {
            return Err(ConfigError::Invalid(
                "snapshotRetentionDays must be > 0".to_string(),
            ));
        }
        if self.lineage_query_limit == 0 {
            return Err(ConfigError::Invalid(
                "lineageQueryLimit must be > 0".to_string(),
            ));
        }
        if self.http.host.trim().is_empty() {
            return Err(ConfigError::Invalid("http.host must not be empty".to_string()));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Invalid("logFilter must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
