use crate::domain::balance::Balance;
use crate::domain::transaction::TransactionKey;
use crate::error::Result;
use std::io::Write;

/// Writes `account,balance` rows, sorted by account.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_balances(&mut self, mut balances: Vec<(TransactionKey, Balance)>) -> Result<()> {
        balances.sort_by(|a, b| a.0.cmp(&b.0));
        self.writer.write_record(["account", "balance"])?;
        for (key, balance) in balances {
            let amount = balance.to_string();
            self.writer
                .write_record([key.from_account.as_str(), amount.as_str()])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
