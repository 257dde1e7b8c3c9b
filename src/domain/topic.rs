//! Topic names, key partitioning and the typed view over raw log records.

use super::transaction::TransactionKey;
use crate::error::{LedgerError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;

pub const PAYMENTS_INFLIGHT: &str = "payments-inflight";
pub const TRANSACTIONS: &str = "transactions";
pub const BALANCE_STORE: &str = "BalanceKeyValueStore";

/// The two processing stages, also used to derive consumer group names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Debit,
    Credit,
}

impl Stage {
    pub fn group(&self, application_id: &str) -> String {
        format!("{application_id}-{self}")
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Debit => f.write_str("debit-processor"),
            Stage::Credit => f.write_str("credit-processor"),
        }
    }
}

/// Maps an account key onto one of `partitions` partitions.
///
/// Stable across processes: the first four bytes of the blake3 digest of the
/// account, little-endian, modulo the partition count.
///
/// `partitions` must be non-zero; [`Topic::new`] enforces this for typed topics.
pub fn partition_for(key: &TransactionKey, partitions: u32) -> u32 {
    assert!(partitions > 0, "partitions must be > 0");
    let hash = blake3::hash(key.from_account.as_bytes());
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % partitions
}

/// A record as stored on the log, payload still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key: TransactionKey,
    pub partition: u32,
    pub offset: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<V> {
    pub key: TransactionKey,
    pub value: V,
    pub partition: u32,
    pub offset: u64,
}

/// Typed handle on a topic: its name, its partition count and the value codec.
#[derive(Debug)]
pub struct Topic<V> {
    name: String,
    partitions: u32,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for Topic<V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            partitions: self.partitions,
            _value: PhantomData,
        }
    }
}

impl<V: Serialize + DeserializeOwned> Topic<V> {
    /// Fails when `partitions` is 0, since no key could be placed.
    pub fn new(name: impl Into<String>, partitions: u32) -> Result<Self> {
        let name = name.into();
        if partitions == 0 {
            return Err(LedgerError::ConfigError(format!(
                "topic {name} needs at least one partition"
            )));
        }
        Ok(Self {
            name,
            partitions,
            _value: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    pub fn partition_for(&self, key: &TransactionKey) -> u32 {
        partition_for(key, self.partitions)
    }

    pub fn encode(&self, value: &V) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode(&self, raw: RawRecord) -> Result<Record<V>> {
        let value = serde_json::from_slice(&raw.payload).map_err(|source| {
            LedgerError::DecodeError {
                topic: self.name.clone(),
                partition: raw.partition,
                offset: raw.offset,
                source,
            }
        })?;
        Ok(Record {
            key: raw.key,
            value,
            partition: raw.partition,
            offset: raw.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::Payment;

    #[test]
    fn test_partition_is_stable_and_in_range() {
        let key = TransactionKey::new("alice");
        let p1 = partition_for(&key, 8);
        let p2 = partition_for(&key, 8);
        assert_eq!(p1, p2);
        assert!(p1 < 8);
        assert_eq!(partition_for(&key, 1), 0);
    }

    #[test]
    fn test_topic_without_partitions_is_rejected() {
        let result: Result<Topic<Payment>> = Topic::new(PAYMENTS_INFLIGHT, 0);
        assert!(matches!(result, Err(LedgerError::ConfigError(_))));
    }

    #[test]
    fn test_group_names() {
        assert_eq!(Stage::Debit.group("wallet"), "wallet-debit-processor");
        assert_eq!(Stage::Credit.group("wallet"), "wallet-credit-processor");
    }

    #[test]
    fn test_decode_failure_reports_position() {
        let topic: Topic<Payment> = Topic::new(PAYMENTS_INFLIGHT, 4).unwrap();
        let raw = RawRecord {
            key: TransactionKey::new("A"),
            partition: 2,
            offset: 7,
            payload: b"not json".to_vec(),
        };
        match topic.decode(raw) {
            Err(LedgerError::DecodeError {
                topic,
                partition,
                offset,
                ..
            }) => {
                assert_eq!(topic, PAYMENTS_INFLIGHT);
                assert_eq!(partition, 2);
                assert_eq!(offset, 7);
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }
}
