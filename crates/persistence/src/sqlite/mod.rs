//! SQLite database management

mod checkpoints;
mod connection;
mod entries;
mod settings;

pub use checkpoints::*;
pub use connection::Database;
pub use entries::*;
pub use settings::*;
