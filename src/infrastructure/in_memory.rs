use crate::domain::balance::Balance;
use crate::domain::ports::{BalanceStore, BalanceUpdate, Checkpoint, EventLog};
use crate::domain::topic::RawRecord;
use crate::domain::transaction::TransactionKey;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

#[derive(Default)]
struct LogState {
    partitions: HashMap<(String, u32), Vec<RawRecord>>,
    offsets: HashMap<(String, String, u32), u64>,
}

/// A thread-safe in-memory event log.
///
/// Every append wakes all tasks parked in [`EventLog::wait_for`]; each
/// re-checks its own partition. Cloning shares the same log.
#[derive(Default, Clone)]
pub struct InMemoryEventLog {
    state: Arc<RwLock<LogState>>,
    appended: Arc<Notify>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(
        &self,
        topic: &str,
        partition: u32,
        key: &TransactionKey,
        payload: Vec<u8>,
    ) -> Result<u64> {
        let offset = {
            let mut state = self.state.write().await;
            let records = state
                .partitions
                .entry((topic.to_string(), partition))
                .or_default();
            let offset = records.len() as u64;
            records.push(RawRecord {
                key: key.clone(),
                partition,
                offset,
                payload,
            });
            offset
        };
        self.appended.notify_waiters();
        Ok(offset)
    }

    async fn read(
        &self,
        topic: &str,
        partition: u32,
        from: u64,
        max: usize,
    ) -> Result<Vec<RawRecord>> {
        let state = self.state.read().await;
        let records = match state.partitions.get(&(topic.to_string(), partition)) {
            Some(records) => records,
            None => return Ok(Vec::new()),
        };
        Ok(records
            .iter()
            .skip(from as usize)
            .take(max)
            .cloned()
            .collect())
    }

    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, |records| records.len() as u64))
    }

    async fn wait_for(&self, topic: &str, partition: u32, offset: u64) -> Result<()> {
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            // Register before checking so an append in between is not missed.
            notified.as_mut().enable();
            if self.end_offset(topic, partition).await? > offset {
                return Ok(());
            }
            notified.await;
        }
    }

    async fn commit_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        next: u64,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .offsets
            .insert((group.to_string(), topic.to_string(), partition), next);
        Ok(())
    }

    async fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>> {
        let state = self.state.read().await;
        Ok(state
            .offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied())
    }
}

#[derive(Default)]
struct StoreState {
    balances: HashMap<TransactionKey, Balance>,
    checkpoints: HashMap<u32, Checkpoint>,
}

/// A thread-safe in-memory balance store.
///
/// Balances and checkpoints sit behind one lock so a commit is atomic.
/// Contents are lost with the process; the credit stage rebuilds them from
/// the log on start.
#[derive(Default, Clone)]
pub struct InMemoryBalanceStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn get(&self, key: &TransactionKey) -> Result<Option<Balance>> {
        let state = self.state.read().await;
        Ok(state.balances.get(key).copied())
    }

    async fn all(&self) -> Result<Vec<(TransactionKey, Balance)>> {
        let state = self.state.read().await;
        let mut balances: Vec<_> = state
            .balances
            .iter()
            .map(|(key, balance)| (key.clone(), *balance))
            .collect();
        balances.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(balances)
    }

    async fn commit(&self, update: BalanceUpdate) -> Result<()> {
        let mut state = self.state.write().await;
        state.balances.insert(update.key, update.balance);
        state.checkpoints.insert(update.partition, update.checkpoint);
        Ok(())
    }

    async fn checkpoint(&self, partition: u32) -> Result<Option<Checkpoint>> {
        let state = self.state.read().await;
        Ok(state.checkpoints.get(&partition).cloned())
    }
}
