#![allow(dead_code)]

use std::sync::Arc;
use walletflow::application::pipeline::LedgerPipeline;
use walletflow::config::PipelineConfig;
use walletflow::domain::ports::EventLog;
use walletflow::domain::topic::{TRANSACTIONS, Topic, partition_for};
use walletflow::domain::transaction::{Payment, Transaction, TransactionKey};
use walletflow::infrastructure::in_memory::{InMemoryBalanceStore, InMemoryEventLog};

pub fn config(partitions: u32) -> PipelineConfig {
    PipelineConfig {
        partitions,
        ..Default::default()
    }
}

pub async fn start(
    config: PipelineConfig,
    log: &InMemoryEventLog,
    store: &InMemoryBalanceStore,
) -> LedgerPipeline {
    LedgerPipeline::start(config, Arc::new(log.clone()), Arc::new(store.clone()))
        .await
        .expect("pipeline should start")
}

pub fn key(account: &str) -> TransactionKey {
    TransactionKey::new(account)
}

pub fn payment(amount: i64, to: &str, reference: &str) -> Payment {
    Payment {
        amount,
        to_account: to.to_string(),
        reference: reference.to_string(),
        description: format!("payment {reference}"),
    }
}

/// Every transaction filed under `key`, in log order.
pub async fn ledger_for(
    log: &InMemoryEventLog,
    partitions: u32,
    key: &TransactionKey,
) -> Vec<Transaction> {
    let topic: Topic<Transaction> = Topic::new(TRANSACTIONS, partitions).unwrap();
    let partition = topic.partition_for(key);
    log.read(TRANSACTIONS, partition, 0, usize::MAX)
        .await
        .unwrap()
        .into_iter()
        .filter(|raw| &raw.key == key)
        .map(|raw| topic.decode(raw).unwrap().value)
        .collect()
}

/// An account hashing to a different partition than `other`.
pub fn account_off_partition(other: &TransactionKey, partitions: u32) -> TransactionKey {
    let taken = partition_for(other, partitions);
    (0..)
        .map(|i| TransactionKey::new(format!("acct-{i}")))
        .find(|candidate| partition_for(candidate, partitions) != taken)
        .unwrap()
}

/// The first generated account that hashes to `partition`.
pub fn account_on_partition(partition: u32, partitions: u32) -> TransactionKey {
    (0..)
        .map(|i| TransactionKey::new(format!("acct-{i}")))
        .find(|candidate| partition_for(candidate, partitions) == partition)
        .unwrap()
}
