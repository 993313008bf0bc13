//! Upload history for quicksave
//!
//! This crate provides:
//! - Ledger entries (ULID-based IDs)
//! - Bounded in-memory ledger with FIFO eviction
//! - Persistent store (sled embedded DB) for entries and the cooldown cell

pub mod entry;
pub mod ledger;
pub mod store;

// Re-exports
pub use entry::{LedgerEntry, UploadRecord};
pub use ledger::Ledger;
pub use store::{LedgerStore, StoreError};
