//! Backends for the log and the balance store.

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
