//! FitCoin Persistence - Ledger store contract and its backends

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryLedger;
pub use sqlite::{Database, SqliteLedger};
pub use store::{Checkpoint, LedgerStore};
