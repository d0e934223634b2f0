//! Data models for the FitCoin ledger

mod event;
mod ledger;
mod redemption;
mod summary;
mod tier;

pub use event::*;
pub use ledger::*;
pub use redemption::*;
pub use summary::*;
pub use tier::*;
