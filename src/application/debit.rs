use crate::config::DedupePolicy;
use crate::domain::ports::EventLogHandle;
use crate::domain::topic::{Record, Topic};
use crate::domain::transaction::{Payment, Transaction, TransactionKey};
use crate::error::Result;
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Bounded memory of recently debited `(account, reference)` pairs.
#[derive(Debug)]
pub struct DedupeWindow {
    capacity: usize,
    order: VecDeque<(TransactionKey, String)>,
    seen: HashSet<(TransactionKey, String)>,
}

impl DedupeWindow {
    pub fn new(policy: DedupePolicy) -> Self {
        let capacity = match policy {
            DedupePolicy::None => 0,
            DedupePolicy::Window { capacity } => capacity,
        };
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `false` if the pair is already in the window.
    pub fn observe(&mut self, key: &TransactionKey, reference: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        let entry = (key.clone(), reference.to_string());
        if self.seen.contains(&entry) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(entry.clone());
        self.order.push_back(entry);
        true
    }
}

/// Turns payment requests into DEBIT records on the ledger log.
///
/// Stateless apart from the optional dedupe window, which the caller owns
/// per partition.
pub struct DebitStage {
    log: EventLogHandle,
    payments: Topic<Payment>,
    transactions: Topic<Transaction>,
}

impl DebitStage {
    pub fn new(
        log: EventLogHandle,
        payments: Topic<Payment>,
        transactions: Topic<Transaction>,
    ) -> Self {
        Self {
            log,
            payments,
            transactions,
        }
    }

    pub fn payments(&self) -> &Topic<Payment> {
        &self.payments
    }

    /// Deterministic id for the payment at this log position, so a replayed
    /// payment yields the same correlation id.
    pub fn correlation_id(&self, record: &Record<Payment>) -> Uuid {
        let position = format!(
            "{}/{}/{}",
            self.payments.name(),
            record.partition,
            record.offset
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, position.as_bytes())
    }

    /// Appends the DEBIT for `record`, returning its `transactions` offset,
    /// or `None` when the dedupe window swallowed it.
    pub async fn process(
        &self,
        record: Record<Payment>,
        dedupe: &mut DedupeWindow,
    ) -> Result<Option<u64>> {
        record.value.validate()?;
        if !dedupe.observe(&record.key, &record.value.reference) {
            tracing::warn!(
                account = %record.key,
                reference = %record.value.reference,
                offset = record.offset,
                "Skipping duplicate payment"
            );
            return Ok(None);
        }

        let correlation_id = self.correlation_id(&record);
        let debit = Transaction::debit_for(record.value, correlation_id);
        let partition = self.transactions.partition_for(&record.key);
        let offset = self
            .log
            .append(
                self.transactions.name(),
                partition,
                &record.key,
                self.transactions.encode(&debit)?,
            )
            .await?;

        tracing::info!(
            account = %record.key,
            amount = debit.amount,
            to_account = %debit.account_to_credit,
            %correlation_id,
            "Debited account"
        );
        Ok(Some(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::EventLog;
    use crate::domain::topic::{PAYMENTS_INFLIGHT, TRANSACTIONS};
    use crate::domain::transaction::TransactionType;
    use crate::error::LedgerError;
    use crate::infrastructure::in_memory::InMemoryEventLog;
    use std::sync::Arc;

    fn stage(log: &InMemoryEventLog) -> DebitStage {
        DebitStage::new(
            Arc::new(log.clone()),
            Topic::new(PAYMENTS_INFLIGHT, 4).unwrap(),
            Topic::new(TRANSACTIONS, 4).unwrap(),
        )
    }

    fn record(offset: u64, amount: i64, reference: &str) -> Record<Payment> {
        Record {
            key: TransactionKey::new("A"),
            value: Payment {
                amount,
                to_account: "B".to_string(),
                reference: reference.to_string(),
                description: "lunch".to_string(),
            },
            partition: 1,
            offset,
        }
    }

    #[tokio::test]
    async fn test_payment_becomes_debit_under_payer_key() {
        let log = InMemoryEventLog::new();
        let stage = stage(&log);
        let mut window = DedupeWindow::new(DedupePolicy::None);

        let offset = stage
            .process(record(0, 30, "p-1"), &mut window)
            .await
            .unwrap();
        assert_eq!(offset, Some(0));

        let transactions: Topic<Transaction> = Topic::new(TRANSACTIONS, 4).unwrap();
        let partition = transactions.partition_for(&TransactionKey::new("A"));
        let raw = log.read(TRANSACTIONS, partition, 0, 10).await.unwrap();
        assert_eq!(raw.len(), 1);
        let debit = transactions.decode(raw[0].clone()).unwrap();
        assert_eq!(debit.key, TransactionKey::new("A"));
        assert_eq!(debit.value.r#type, TransactionType::Debit);
        assert_eq!(debit.value.amount, 30);
        assert_eq!(debit.value.account_to_credit, "B");
        assert_eq!(debit.value.correlation_id, stage.correlation_id(&record(0, 30, "p-1")));
    }

    #[tokio::test]
    async fn test_duplicates_pass_without_window() {
        let log = InMemoryEventLog::new();
        let stage = stage(&log);
        let mut window = DedupeWindow::new(DedupePolicy::None);

        assert!(stage.process(record(0, 30, "p-1"), &mut window).await.unwrap().is_some());
        assert!(stage.process(record(1, 30, "p-1"), &mut window).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_window_skips_repeated_reference() {
        let log = InMemoryEventLog::new();
        let stage = stage(&log);
        let mut window = DedupeWindow::new(DedupePolicy::Window { capacity: 8 });

        assert!(stage.process(record(0, 30, "p-1"), &mut window).await.unwrap().is_some());
        assert!(stage.process(record(1, 30, "p-1"), &mut window).await.unwrap().is_none());
        assert!(stage.process(record(2, 30, "p-2"), &mut window).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_payment_is_rejected() {
        let log = InMemoryEventLog::new();
        let stage = stage(&log);
        let mut window = DedupeWindow::new(DedupePolicy::None);

        let result = stage.process(record(0, -5, "p-1"), &mut window).await;
        assert!(matches!(result, Err(LedgerError::ValidationError(_))));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let key = TransactionKey::new("A");
        let mut window = DedupeWindow::new(DedupePolicy::Window { capacity: 2 });
        assert!(window.observe(&key, "1"));
        assert!(window.observe(&key, "2"));
        assert!(window.observe(&key, "3"));
        // "1" fell out of the window
        assert!(window.observe(&key, "1"));
        assert!(!window.observe(&key, "3"));
    }

    #[test]
    fn test_correlation_id_is_positional() {
        let log = InMemoryEventLog::new();
        let stage = stage(&log);
        assert_eq!(
            stage.correlation_id(&record(3, 1, "x")),
            stage.correlation_id(&record(3, 9, "y"))
        );
        assert_ne!(
            stage.correlation_id(&record(3, 1, "x")),
            stage.correlation_id(&record(4, 1, "x"))
        );
    }
}
