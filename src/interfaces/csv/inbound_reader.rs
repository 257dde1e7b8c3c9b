use crate::domain::transaction::{Payment, TransactionKey};
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum InboundKind {
    Payment,
    Credit,
}

#[derive(Debug, Deserialize)]
struct InboundRow {
    kind: InboundKind,
    account: String,
    amount: i64,
    to_account: Option<String>,
    reference: Option<String>,
    description: Option<String>,
}

/// A record entering the pipeline from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A payment request from `key`, bound for `payments-inflight`.
    Payment { key: TransactionKey, payment: Payment },
    /// Funds credited to `key` directly on the ledger.
    Credit {
        key: TransactionKey,
        amount: i64,
        reference: String,
        description: String,
    },
}

impl TryFrom<InboundRow> for Inbound {
    type Error = LedgerError;

    fn try_from(row: InboundRow) -> Result<Self> {
        if row.account.is_empty() {
            return Err(LedgerError::ValidationError(
                "Row has no account".to_string(),
            ));
        }
        let key = TransactionKey::new(row.account);
        let reference = row.reference.unwrap_or_default();
        let description = row.description.unwrap_or_default();
        match row.kind {
            InboundKind::Payment => {
                let payment = Payment {
                    amount: row.amount,
                    to_account: row.to_account.unwrap_or_default(),
                    reference,
                    description,
                };
                payment.validate()?;
                Ok(Inbound::Payment { key, payment })
            }
            InboundKind::Credit => {
                if row.amount < 0 {
                    return Err(LedgerError::ValidationError(format!(
                        "Credit to {} has negative amount {}",
                        key, row.amount
                    )));
                }
                Ok(Inbound::Credit {
                    key,
                    amount: row.amount,
                    reference,
                    description,
                })
            }
        }
    }
}

/// Reads inbound records from a CSV source.
///
/// Columns: `kind,account,amount,to_account,reference,description`, where
/// `kind` is `payment` or `credit`. Whitespace is trimmed and trailing
/// optional columns may be omitted.
pub struct InboundReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> InboundReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and validates rows; a bad row yields an error and reading
    /// continues with the next one.
    pub fn records(self) -> impl Iterator<Item = Result<Inbound>> {
        self.reader.into_deserialize().map(|result| {
            let row: InboundRow = result?;
            Inbound::try_from(row)
        })
    }
}
