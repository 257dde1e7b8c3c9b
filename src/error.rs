use crate::domain::topic::Stage;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// A record on the log could not be decoded into its topic's value type.
    #[error("Malformed record on {topic}[{partition}] at offset {offset}: {source}")]
    DecodeError {
        topic: String,
        partition: u32,
        offset: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("Balance overflow for account {0}")]
    BalanceOverflow(String),
    #[error("{stage} partition {partition} halted: {source}")]
    PartitionHalted {
        stage: Stage,
        partition: u32,
        #[source]
        source: Box<LedgerError>,
    },
    /// The balance for `offset` was committed but its credit never reached the log.
    #[error("Credit for offset {offset} was not appended: {source}")]
    UnconfirmedCredit {
        offset: u64,
        #[source]
        source: Box<LedgerError>,
    },
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        LedgerError::StorageError(err.to_string())
    }
}
