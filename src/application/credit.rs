use super::aggregate::{BalanceAggregator, Restored};
use crate::config::ExceptionPolicy;
use crate::domain::balance::Balance;
use crate::domain::ports::{BalanceStoreHandle, Emission, EventLogHandle, Routing};
use crate::domain::topic::{Record, Topic};
use crate::domain::transaction::{Transaction, TransactionKey, TransactionType};
use crate::error::{LedgerError, Result};

/// Decides where the CREDIT for a DEBIT goes, given the payer's balance
/// after that DEBIT.
///
/// A non-negative balance forwards the amount to `account_to_credit`; a
/// negative one sends it back to the payer, leaving the pair net zero on the
/// payer's account. Amount, reference, description and correlation id are
/// carried over unchanged.
pub fn route(payer: &TransactionKey, debit: &Transaction, balance_after: Balance) -> Emission {
    let credit = Transaction {
        r#type: TransactionType::Credit,
        ..debit.clone()
    };
    if balance_after.is_sufficient() {
        Emission {
            key: TransactionKey::new(debit.account_to_credit.clone()),
            transaction: credit,
            routing: Routing::Forward,
        }
    } else {
        Emission {
            key: payer.clone(),
            transaction: credit,
            routing: Routing::Reversal,
        }
    }
}

/// Consumes the ledger log, keeps the balance view current and answers every
/// DEBIT with a forward credit or a reversal.
pub struct CreditStage {
    log: EventLogHandle,
    aggregator: BalanceAggregator,
    transactions: Topic<Transaction>,
    group: String,
}

impl CreditStage {
    pub fn new(
        log: EventLogHandle,
        store: BalanceStoreHandle,
        transactions: Topic<Transaction>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            log,
            aggregator: BalanceAggregator::new(store),
            transactions,
            group: group.into(),
        }
    }

    pub fn transactions(&self) -> &Topic<Transaction> {
        &self.transactions
    }

    pub fn aggregator(&self) -> &BalanceAggregator {
        &self.aggregator
    }

    /// Restores the store for `partition`, re-appends a credit whose append
    /// was not confirmed, and returns the offset to resume from.
    pub async fn recover(
        &self,
        partition: u32,
        policy: ExceptionPolicy,
        batch: usize,
    ) -> Result<u64> {
        let Restored {
            next_offset,
            pending,
            ..
        } = self
            .aggregator
            .restore(
                self.log.as_ref(),
                &self.transactions,
                &self.group,
                partition,
                policy,
                batch,
            )
            .await?;

        if let Some(emission) = pending {
            tracing::warn!(
                partition,
                account = %emission.key,
                correlation_id = %emission.transaction.correlation_id,
                "Re-emitting unconfirmed credit"
            );
            self.emit(&emission).await?;
        }
        let committed = self
            .log
            .committed_offset(&self.group, self.transactions.name(), partition)
            .await?;
        if committed != Some(next_offset) {
            self.log
                .commit_offset(&self.group, self.transactions.name(), partition, next_offset)
                .await?;
        }
        Ok(next_offset)
    }

    /// Folds `record` into the balance view and, for a DEBIT, appends the
    /// resulting credit. CREDIT records only move the balance.
    pub async fn process(&self, record: &Record<Transaction>) -> Result<Option<Emission>> {
        let (balance, emission) = self
            .aggregator
            .materialize(record, |balance| {
                record
                    .value
                    .is_debit()
                    .then(|| route(&record.key, &record.value, balance))
            })
            .await?;

        tracing::info!(
            account = %record.key,
            balance = balance.value(),
            offset = record.offset,
            "Materialized account balance"
        );

        if let Some(emission) = &emission {
            self.emit(emission)
                .await
                .map_err(|err| LedgerError::UnconfirmedCredit {
                    offset: record.offset,
                    source: Box::new(err),
                })?;
        }
        Ok(emission)
    }

    async fn emit(&self, emission: &Emission) -> Result<u64> {
        let partition = self.transactions.partition_for(&emission.key);
        let offset = self
            .log
            .append(
                self.transactions.name(),
                partition,
                &emission.key,
                self.transactions.encode(&emission.transaction)?,
            )
            .await?;

        match emission.routing {
            Routing::Forward => tracing::info!(
                account = %emission.key,
                amount = emission.transaction.amount,
                correlation_id = %emission.transaction.correlation_id,
                "Crediting recipient"
            ),
            Routing::Reversal => tracing::info!(
                account = %emission.key,
                amount = emission.transaction.amount,
                correlation_id = %emission.transaction.correlation_id,
                "Insufficient funds, reversing"
            ),
        }
        Ok(offset)
    }
}
