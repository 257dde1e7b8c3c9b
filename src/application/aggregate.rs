use crate::config::ExceptionPolicy;
use crate::domain::balance::Balance;
use crate::domain::ports::{BalanceStoreHandle, BalanceUpdate, Checkpoint, Emission, EventLog};
use crate::domain::topic::{Record, Topic};
use crate::domain::transaction::{Transaction, TransactionKey};
use crate::error::{LedgerError, Result};

/// Where the credit stage picks up after recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    /// First `transactions` offset the stage has not yet handled.
    pub next_offset: u64,
    /// Records folded into the store during replay.
    pub replayed: u64,
    /// A credit that was decided but may not have reached the log.
    pub pending: Option<Emission>,
}

/// Maintains the materialized balance view from the `transactions` stream.
///
/// The store holds nothing that cannot be derived from the log: each record
/// is folded in log order and committed together with the partition
/// checkpoint, and a lost or stale store is caught up by replay.
#[derive(Clone)]
pub struct BalanceAggregator {
    store: BalanceStoreHandle,
}

impl BalanceAggregator {
    pub fn new(store: BalanceStoreHandle) -> Self {
        Self { store }
    }

    /// Current balance, 0 for an account never seen.
    pub async fn balance(&self, key: &TransactionKey) -> Result<Balance> {
        Ok(self.store.get(key).await?.unwrap_or_default())
    }

    /// Folds `record` into the store and commits it.
    ///
    /// `decide` sees the post-record balance and returns the credit to emit,
    /// if any; it is committed with the balance as the checkpoint's pending
    /// emission.
    pub async fn materialize<F>(
        &self,
        record: &Record<Transaction>,
        decide: F,
    ) -> Result<(Balance, Option<Emission>)>
    where
        F: FnOnce(Balance) -> Option<Emission>,
    {
        let current = self.balance(&record.key).await?;
        let balance = current.apply(&record.key.from_account, &record.value)?;
        let pending = decide(balance);

        self.store
            .commit(BalanceUpdate {
                partition: record.partition,
                key: record.key.clone(),
                balance,
                checkpoint: Checkpoint {
                    offset: record.offset,
                    pending: pending.clone(),
                },
            })
            .await?;
        Ok((balance, pending))
    }

    /// Brings the store level with the credit group's committed offset.
    ///
    /// Records between the store checkpoint and the committed offset already
    /// had their credits emitted, so they are folded in without routing.
    pub async fn restore(
        &self,
        log: &dyn EventLog,
        topic: &Topic<Transaction>,
        group: &str,
        partition: u32,
        policy: ExceptionPolicy,
        batch: usize,
    ) -> Result<Restored> {
        let checkpoint = self.store.checkpoint(partition).await?;
        let committed = log
            .committed_offset(group, topic.name(), partition)
            .await?
            .unwrap_or(0);
        let mut next = checkpoint.as_ref().map_or(0, |c| c.offset + 1);
        let mut replayed = 0;

        while next < committed {
            let remaining = (committed - next) as usize;
            let records = log
                .read(topic.name(), partition, next, batch.min(remaining))
                .await?;
            if records.is_empty() {
                return Err(LedgerError::StorageError(format!(
                    "{}[{}] ends at {} but {} is committed up to {}",
                    topic.name(),
                    partition,
                    next,
                    group,
                    committed
                )));
            }
            for raw in records {
                let offset = raw.offset;
                let folded = match topic.decode(raw) {
                    Ok(record) => self.materialize(&record, |_| None).await.map(|_| ()),
                    Err(err) => Err(err),
                };
                match (folded, policy) {
                    (Ok(()), _) => replayed += 1,
                    (Err(err), ExceptionPolicy::LogAndContinue) => {
                        tracing::warn!(partition, offset, error = %err, "Skipping record during restore");
                    }
                    (Err(err), ExceptionPolicy::LogAndFail) => return Err(err),
                }
                next = offset + 1;
            }
        }

        let pending = match checkpoint {
            Some(Checkpoint {
                offset,
                pending: Some(emission),
            }) if offset >= committed => Some(emission),
            _ => None,
        };

        tracing::info!(partition, replayed, next, "Restored balance store");
        Ok(Restored {
            next_offset: next,
            replayed,
            pending,
        })
    }
}
