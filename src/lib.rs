//! Two-stage wallet ledger over a partitioned event log.
//!
//! Payment requests become DEBIT records on the `transactions` log. A second
//! stage folds every record into a per-account balance view and answers each
//! DEBIT with a CREDIT: to the recipient when the payer's balance after the
//! debit is non-negative, back to the payer otherwise.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
