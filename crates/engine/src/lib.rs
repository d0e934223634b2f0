//! FitCoin Engine - Ingestion, balance and tier derivation, redemption and expiry

pub mod balance;
mod context;
pub mod expiry;
pub mod ingestor;
pub mod ledger;
pub mod locks;
pub mod redemption;
pub mod replay;

pub use balance::BalanceEngine;
pub use expiry::{spawn_expiry_sweeper, ExpirySweeper, ExpirySweeperHandle, SweeperStatus};
pub use ingestor::EventIngestor;
pub use ledger::RewardsLedger;
pub use locks::AccountLocks;
pub use redemption::RedemptionAuthority;
pub use replay::{AccountState, Lot};
