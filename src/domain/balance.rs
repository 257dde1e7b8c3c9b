use super::transaction::{Transaction, TransactionType};
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Running balance of one account, in minor units.
///
/// Defined as the sum of CREDIT amounts minus the sum of DEBIT amounts filed
/// under the account, in log order. It is never set directly, only advanced
/// one record at a time through [`Balance::apply`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Balance(pub i64);

impl Balance {
    pub const ZERO: Self = Self(0);

    pub fn new(amount: i64) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Funds exactly exhausted still count as sufficient.
    pub fn is_sufficient(&self) -> bool {
        self.0 >= 0
    }

    /// Returns the balance after `tx`, which must be filed under this balance's account.
    pub fn apply(self, account: &str, tx: &Transaction) -> Result<Self> {
        let next = match tx.r#type {
            TransactionType::Credit => self.0.checked_add(tx.amount),
            TransactionType::Debit => self.0.checked_sub(tx.amount),
        };
        next.map(Self)
            .ok_or_else(|| LedgerError::BalanceOverflow(account.to_string()))
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
