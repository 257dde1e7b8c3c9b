use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies the account a record is filed under.
///
/// This is the partition and ordering key of both topics: every record for the
/// same account lands on the same partition and is observed in append order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionKey {
    pub from_account: String,
}

impl TransactionKey {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            from_account: account.into(),
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.from_account)
    }
}

/// An inbound payment request, keyed by the paying account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Amount in minor units.
    pub amount: i64,
    pub to_account: String,
    pub reference: String,
    pub description: String,
}

impl Payment {
    pub fn validate(&self) -> Result<()> {
        if self.amount < 0 {
            return Err(LedgerError::ValidationError(format!(
                "Payment {} has negative amount {}",
                self.reference, self.amount
            )));
        }
        if self.to_account.is_empty() {
            return Err(LedgerError::ValidationError(format!(
                "Payment {} has no destination account",
                self.reference
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Debit => f.write_str("DEBIT"),
            TransactionType::Credit => f.write_str("CREDIT"),
        }
    }
}

/// The durable ledger record.
///
/// The account it affects is the key it is filed under on the log, not
/// `account_to_credit`; that field only carries the forward destination of a
/// DEBIT.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Transaction {
    pub amount: i64,
    pub account_to_credit: String,
    pub reference: String,
    pub description: String,
    pub r#type: TransactionType,
    /// Shared by a DEBIT and the CREDIT (forward or reversal) it produced.
    #[serde(default)]
    pub correlation_id: Uuid,
}

impl Transaction {
    pub fn is_debit(&self) -> bool {
        self.r#type == TransactionType::Debit
    }

    /// Builds the DEBIT filed under the paying account for `payment`.
    pub fn debit_for(payment: Payment, correlation_id: Uuid) -> Self {
        Self {
            amount: payment.amount,
            account_to_credit: payment.to_account,
            reference: payment.reference,
            description: payment.description,
            r#type: TransactionType::Debit,
            correlation_id,
        }
    }

    /// Opening or externally originated credit.
    pub fn credit(amount: i64, reference: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            amount,
            account_to_credit: String::new(),
            reference: reference.into(),
            description: description.into(),
            r#type: TransactionType::Credit,
            correlation_id: Uuid::new_v4(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(amount: i64, to: &str) -> Payment {
        Payment {
            amount,
            to_account: to.to_string(),
            reference: "ref-1".to_string(),
            description: "rent".to_string(),
        }
    }

    #[test]
    fn test_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&TransactionType::Debit).unwrap(),
            "\"DEBIT\""
        );
        let parsed: TransactionType = serde_json::from_str("\"CREDIT\"").unwrap();
        assert_eq!(parsed, TransactionType::Credit);
    }

    #[test]
    fn test_debit_for_copies_payment_fields() {
        let id = Uuid::new_v4();
        let tx = Transaction::debit_for(payment(30, "B"), id);
        assert_eq!(tx.amount, 30);
        assert_eq!(tx.account_to_credit, "B");
        assert_eq!(tx.reference, "ref-1");
        assert_eq!(tx.description, "rent");
        assert!(tx.is_debit());
        assert_eq!(tx.correlation_id, id);
    }

    #[test]
    fn test_payment_validation() {
        assert!(payment(0, "B").validate().is_ok());
        assert!(matches!(
            payment(-1, "B").validate(),
            Err(LedgerError::ValidationError(_))
        ));
        assert!(matches!(
            payment(5, "").validate(),
            Err(LedgerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_correlation_id_decodes_as_nil() {
        let json = r#"{"amount":5,"account_to_credit":"B","reference":"r","description":"d","type":"DEBIT"}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.correlation_id, Uuid::nil());
    }
}
