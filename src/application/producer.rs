use crate::domain::ports::EventLogHandle;
use crate::domain::topic::Topic;
use crate::domain::transaction::{Payment, Transaction, TransactionKey};
use crate::error::{LedgerError, Result};

/// Entry point for records originating outside the pipeline.
#[derive(Clone)]
pub struct Producer {
    log: EventLogHandle,
    payments: Topic<Payment>,
    transactions: Topic<Transaction>,
}

impl Producer {
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

    /// Puts a payment request from `key` on the inflight topic.
    pub async fn submit_payment(&self, key: &TransactionKey, payment: &Payment) -> Result<u64> {
        let partition = self.payments.partition_for(key);
        self.log
            .append(
                self.payments.name(),
                partition,
                key,
                self.payments.encode(payment)?,
            )
            .await
    }

    /// Files a CREDIT for `key` directly on the ledger, e.g. an opening balance.
    /// Negative amounts are rejected before anything is appended.
    pub async fn seed_credit(
        &self,
        key: &TransactionKey,
        amount: i64,
        reference: &str,
        description: &str,
    ) -> Result<u64> {
        if amount < 0 {
            return Err(LedgerError::ValidationError(format!(
                "Credit to {key} has negative amount {amount}"
            )));
        }
        let credit = Transaction::credit(amount, reference, description);
        let partition = self.transactions.partition_for(key);
        self.log
            .append(
                self.transactions.name(),
                partition,
                key,
                self.transactions.encode(&credit)?,
            )
            .await
    }
}
