use super::balance::Balance;
use super::topic::RawRecord;
use super::transaction::{Transaction, TransactionKey};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A durable, partitioned, key-ordered append-only log.
///
/// Offsets are dense per `(topic, partition)` and start at 0. Consumer group
/// offsets follow the usual convention: the committed value is the offset of
/// the next record the group has yet to process.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(
        &self,
        topic: &str,
        partition: u32,
        key: &TransactionKey,
        payload: Vec<u8>,
    ) -> Result<u64>;
    async fn read(&self, topic: &str, partition: u32, from: u64, max: usize)
    -> Result<Vec<RawRecord>>;
    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64>;
    /// Suspends until a record exists at `offset`.
    async fn wait_for(&self, topic: &str, partition: u32, offset: u64) -> Result<()>;
    async fn commit_offset(&self, group: &str, topic: &str, partition: u32, next: u64)
    -> Result<()>;
    async fn committed_offset(&self, group: &str, topic: &str, partition: u32)
    -> Result<Option<u64>>;
}

/// Whether a DEBIT went through to the recipient or was sent back to the payer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Routing {
    Forward,
    Reversal,
}

/// A CREDIT derived from a DEBIT, with the key it is filed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emission {
    pub key: TransactionKey,
    pub transaction: Transaction,
    pub routing: Routing,
}

/// Progress of the credit stage on one `transactions` partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Offset of the last record folded into the store.
    pub offset: u64,
    /// Credit decided for that record, kept until the log confirms it.
    pub pending: Option<Emission>,
}

/// One materialization step: new balance for `key` and the checkpoint that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub partition: u32,
    pub key: TransactionKey,
    pub balance: Balance,
    pub checkpoint: Checkpoint,
}

/// The materialized balance view. Only the credit stage writes to it.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn get(&self, key: &TransactionKey) -> Result<Option<Balance>>;
    async fn all(&self) -> Result<Vec<(TransactionKey, Balance)>>;
    /// Writes the balance and the partition checkpoint atomically.
    async fn commit(&self, update: BalanceUpdate) -> Result<()>;
    async fn checkpoint(&self, partition: u32) -> Result<Option<Checkpoint>>;
}

pub type EventLogHandle = Arc<dyn EventLog>;
pub type BalanceStoreHandle = Arc<dyn BalanceStore>;
