//! Application layer: the two ledger stages, the balance aggregate they share
//! and the runtime that drives them partition by partition.

pub mod aggregate;
pub mod credit;
pub mod debit;
pub mod pipeline;
pub mod producer;
