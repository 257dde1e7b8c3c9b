//! Pipeline configuration.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a worker does when a single record cannot be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExceptionPolicy {
    /// Halt the partition; its offset stays on the failing record.
    #[default]
    LogAndFail,
    /// Log the failure, skip the record and keep going.
    LogAndContinue,
}

/// Duplicate suppression for inbound payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DedupePolicy {
    /// Every delivered payment becomes a DEBIT.
    #[default]
    None,
    /// Skip a payment whose `(account, reference)` was seen among the last
    /// `capacity` payments of the same partition.
    Window { capacity: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Prefix of the consumer group names.
    pub application_id: String,

    /// Partition count of both topics.
    pub partitions: u32,

    /// Worker threads of the tokio runtime hosting the stages.
    pub num_stream_threads: usize,

    /// Records handled per worker poll.
    pub max_poll_records: usize,

    pub exception_policy: ExceptionPolicy,

    pub dedupe: DedupePolicy,

    /// RocksDB directory; in-memory backends when absent.
    pub data_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            application_id: "wallet".to_string(),
            partitions: 8,
            num_stream_threads: 1,
            max_poll_records: 100,
            exception_policy: ExceptionPolicy::default(),
            dedupe: DedupePolicy::default(),
            data_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `WALLETFLOW_*` environment variables on top of `self`.
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(id) = std::env::var("WALLETFLOW_APPLICATION_ID") {
            self.application_id = id;
        }
        if let Ok(partitions) = std::env::var("WALLETFLOW_PARTITIONS") {
            self.partitions = parse_env("WALLETFLOW_PARTITIONS", &partitions)?;
        }
        if let Ok(threads) = std::env::var("WALLETFLOW_STREAM_THREADS") {
            self.num_stream_threads = parse_env("WALLETFLOW_STREAM_THREADS", &threads)?;
        }
        if let Ok(dir) = std::env::var("WALLETFLOW_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    pub fn validate(&self) -> Result<()> {
        if self.application_id.is_empty() {
            return Err(LedgerError::ConfigError(
                "application_id must not be empty".to_string(),
            ));
        }
        if self.partitions == 0 {
            return Err(LedgerError::ConfigError("partitions must be > 0".to_string()));
        }
        if self.num_stream_threads == 0 {
            return Err(LedgerError::ConfigError(
                "num_stream_threads must be > 0".to_string(),
            ));
        }
        if self.max_poll_records == 0 {
            return Err(LedgerError::ConfigError(
                "max_poll_records must be > 0".to_string(),
            ));
        }
        if let DedupePolicy::Window { capacity: 0 } = self.dedupe {
            return Err(LedgerError::ConfigError(
                "dedupe window capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| LedgerError::ConfigError(format!("{name} has invalid value {value:?}")))
}
