//! Domain layer: ledger records, the per-account balance value, topic typing,
//! and the ports the pipeline talks to.

pub mod balance;
pub mod ports;
pub mod topic;
pub mod transaction;
