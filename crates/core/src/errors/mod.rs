//! Error types and Result alias for the FitCoin ledger

use thiserror::Error;

/// Main error type for the FitCoin ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid event kind: {0}")]
    InvalidEventKind(String),

    #[error("Duplicate event for account {account_id}: {dedupe_key}")]
    DuplicateEvent {
        account_id: String,
        dedupe_key: String,
    },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("Product {product_id} discount cap exceeded: requested {requested}, cap {cap}")]
    ExceedsProductCap {
        product_id: String,
        requested: i64,
        cap: i64,
    },

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("Account {account_id} version conflict: expected {expected}, found {actual}")]
    AccountVersionConflict {
        account_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    /// Whether the caller may retry the same request (with the same idempotency key)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AccountVersionConflict { .. } | Error::Timeout(_))
    }

    /// Message suitable for showing to the end user at checkout.
    ///
    /// Balance and cap violations are actionable; everything internal collapses
    /// into a generic retry prompt.
    pub fn user_message(&self) -> String {
        match self {
            Error::InsufficientBalance { requested, available } => format!(
                "You only have {} FitCoins available, but {} were requested.",
                available, requested
            ),
            Error::ExceedsProductCap { cap, .. } => format!(
                "You can use at most {} FitCoins on this product.",
                cap
            ),
            Error::UnknownProduct(_) => "FitCoins can't be used on this product.".to_string(),
            Error::InvalidAmount(_) => "Enter a positive number of FitCoins.".to_string(),
            _ => "Something went wrong, please try again.".to_string(),
        }
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}
