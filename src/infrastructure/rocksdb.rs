use crate::domain::balance::Balance;
use crate::domain::ports::{BalanceStore, BalanceUpdate, Checkpoint, EventLog};
use crate::domain::topic::{BALANCE_STORE, RawRecord};
use crate::domain::transaction::TransactionKey;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Column Family for log records, keyed by `topic 0x00 partition offset`.
pub const CF_LOG: &str = "log";
/// Column Family for consumer group offsets.
pub const CF_OFFSETS: &str = "offsets";
/// Column Family for credit stage checkpoints, keyed by partition.
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// A persistent implementation of both the event log and the balance store.
///
/// Keeping both in one database lets a restarted process find the log and
/// the materialized view exactly where it left them. Balances live in the
/// `BalanceKeyValueStore` column family.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    /// Next offset per `(topic, partition)`; appends hold this lock.
    ends: Arc<Mutex<HashMap<(String, u32), u64>>>,
    appended: Arc<Notify>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_LOG, CF_OFFSETS, BALANCE_STORE, CF_CHECKPOINTS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), descriptors)?;
        tracing::info!(path = %path.as_ref().display(), "Opened RocksDB store");

        Ok(Self {
            db: Arc::new(db),
            ends: Arc::new(Mutex::new(HashMap::new())),
            appended: Arc::new(Notify::new()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::StorageError(format!("Column family {} not found", name)))
    }

    fn partition_prefix(topic: &str, partition: u32) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(topic.len() + 5);
        prefix.extend_from_slice(topic.as_bytes());
        prefix.push(0);
        prefix.extend_from_slice(&partition.to_be_bytes());
        prefix
    }

    fn record_key(topic: &str, partition: u32, offset: u64) -> Vec<u8> {
        let mut key = Self::partition_prefix(topic, partition);
        key.extend_from_slice(&offset.to_be_bytes());
        key
    }

    fn offset_key(group: &str, topic: &str, partition: u32) -> Vec<u8> {
        let mut key = Vec::with_capacity(group.len() + 1);
        key.extend_from_slice(group.as_bytes());
        key.push(0);
        key.extend_from_slice(&Self::partition_prefix(topic, partition));
        key
    }

    /// Record values are `u32 key length | key | payload`.
    fn encode_record(key: &TransactionKey, payload: &[u8]) -> Vec<u8> {
        let account = key.from_account.as_bytes();
        let mut value = Vec::with_capacity(4 + account.len() + payload.len());
        value.extend_from_slice(&(account.len() as u32).to_be_bytes());
        value.extend_from_slice(account);
        value.extend_from_slice(payload);
        value
    }

    fn decode_record(partition: u32, offset: u64, value: &[u8]) -> Result<RawRecord> {
        let corrupt =
            || LedgerError::StorageError(format!("Corrupt log entry at offset {}", offset));
        let len_bytes: [u8; 4] = value
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(corrupt)?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        let account = value.get(4..4 + len).ok_or_else(corrupt)?;
        let account = String::from_utf8(account.to_vec()).map_err(|_| corrupt())?;
        Ok(RawRecord {
            key: TransactionKey::new(account),
            partition,
            offset,
            payload: value[4 + len..].to_vec(),
        })
    }

    /// Scans backwards from the end of the partition for its last offset.
    fn scan_end(&self, topic: &str, partition: u32) -> Result<u64> {
        let cf = self.cf(CF_LOG)?;
        let prefix = Self::partition_prefix(topic, partition);
        let upper = Self::record_key(topic, partition, u64::MAX);
        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                if key.len() == prefix.len() + 8 && key.starts_with(&prefix) {
                    let mut offset = [0u8; 8];
                    offset.copy_from_slice(&key[prefix.len()..]);
                    Ok(u64::from_be_bytes(offset) + 1)
                } else {
                    Ok(0)
                }
            }
            None => Ok(0),
        }
    }

    async fn cached_end(&self, topic: &str, partition: u32) -> Result<u64> {
        let mut ends = self.ends.lock().await;
        if let Some(end) = ends.get(&(topic.to_string(), partition)) {
            return Ok(*end);
        }
        let end = self.scan_end(topic, partition)?;
        ends.insert((topic.to_string(), partition), end);
        Ok(end)
    }
}

#[async_trait]
impl EventLog for RocksDBStore {
    async fn append(
        &self,
        topic: &str,
        partition: u32,
        key: &TransactionKey,
        payload: Vec<u8>,
    ) -> Result<u64> {
        let offset = {
            let mut ends = self.ends.lock().await;
            let end = match ends.get(&(topic.to_string(), partition)) {
                Some(end) => *end,
                None => self.scan_end(topic, partition)?,
            };
            let cf = self.cf(CF_LOG)?;
            self.db.put_cf(
                cf,
                Self::record_key(topic, partition, end),
                Self::encode_record(key, &payload),
            )?;
            ends.insert((topic.to_string(), partition), end + 1);
            end
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
        let cf = self.cf(CF_LOG)?;
        let prefix = Self::partition_prefix(topic, partition);
        let start = Self::record_key(topic, partition, from);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            if records.len() >= max {
                break;
            }
            let (key, value) = item?;
            if key.len() != prefix.len() + 8 || !key.starts_with(&prefix) {
                break;
            }
            let mut offset = [0u8; 8];
            offset.copy_from_slice(&key[prefix.len()..]);
            records.push(Self::decode_record(
                partition,
                u64::from_be_bytes(offset),
                &value,
            )?);
        }
        Ok(records)
    }

    async fn end_offset(&self, topic: &str, partition: u32) -> Result<u64> {
        self.cached_end(topic, partition).await
    }

    async fn wait_for(&self, topic: &str, partition: u32, offset: u64) -> Result<()> {
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
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
        let cf = self.cf(CF_OFFSETS)?;
        self.db.put_cf(
            cf,
            Self::offset_key(group, topic, partition),
            next.to_be_bytes(),
        )?;
        Ok(())
    }

    async fn committed_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>> {
        let cf = self.cf(CF_OFFSETS)?;
        match self.db.get_cf(cf, Self::offset_key(group, topic, partition))? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    LedgerError::StorageError("Corrupt consumer offset".to_string())
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BalanceStore for RocksDBStore {
    async fn get(&self, key: &TransactionKey) -> Result<Option<Balance>> {
        let cf = self.cf(BALANCE_STORE)?;
        match self.db.get_cf(cf, key.from_account.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn all(&self) -> Result<Vec<(TransactionKey, Balance)>> {
        let cf = self.cf(BALANCE_STORE)?;
        let mut balances = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let account = String::from_utf8(key.to_vec())
                .map_err(|e| LedgerError::InternalError(Box::new(e)))?;
            balances.push((TransactionKey::new(account), serde_json::from_slice(&value)?));
        }
        Ok(balances)
    }

    async fn commit(&self, update: BalanceUpdate) -> Result<()> {
        let balances = self.cf(BALANCE_STORE)?;
        let checkpoints = self.cf(CF_CHECKPOINTS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            balances,
            update.key.from_account.as_bytes(),
            serde_json::to_vec(&update.balance)?,
        );
        batch.put_cf(
            checkpoints,
            update.partition.to_be_bytes(),
            serde_json::to_vec(&update.checkpoint)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn checkpoint(&self, partition: u32) -> Result<Option<Checkpoint>> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        match self.db.get_cf(cf, partition.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
