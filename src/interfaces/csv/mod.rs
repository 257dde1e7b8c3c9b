//! CSV input of inbound records and output of balances for the CLI.

pub mod balance_writer;
pub mod inbound_reader;
