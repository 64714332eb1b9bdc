use thiserror::Error;

use crate::domain::entities::account::AccountId;
use crate::domain::repositories::trading_store::StoreError;
use crate::domain::value_objects::money::Cents;

/// Bad input. Never retryable; the message is safe to show to the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid side: {0} (expected BUY or SELL)")]
    InvalidSide(String),

    #[error("Invalid order status: {0}")]
    InvalidStatus(String),

    #[error("Value must be finite")]
    MustBeFinite,

    #[error("Arithmetic overflow computing {0}")]
    Overflow(&'static str),
}

/// Coarse classification used for logging and boundary mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientFunds,
    Persistence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Minor,
    Moderate,
    Critical,
}

/// Failures of a single trade. Every variant aborts and rolls back the whole unit.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Instrument {symbol} not found")]
    InstrumentNotFound { symbol: String },

    #[error("Account {account_id} not found")]
    AccountNotFound { account_id: AccountId },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Cents, available: Cents },

    #[error("Failed to save order: {0}")]
    FailedToSaveOrder(#[source] StoreError),

    #[error("Failed to save holding: {0}")]
    FailedToSaveHolding(#[source] StoreError),

    #[error("Failed to save account: {0}")]
    FailedToSaveAccount(#[source] StoreError),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl TradeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TradeError::Validation(_) => ErrorKind::Validation,
            TradeError::InstrumentNotFound { .. } | TradeError::AccountNotFound { .. } => {
                ErrorKind::NotFound
            }
            TradeError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            TradeError::FailedToSaveOrder(_)
            | TradeError::FailedToSaveHolding(_)
            | TradeError::FailedToSaveAccount(_)
            | TradeError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => ErrorSeverity::Minor,
            ErrorKind::InsufficientFunds => ErrorSeverity::Moderate,
            ErrorKind::Persistence => ErrorSeverity::Critical,
        }
    }

    /// Short error code for logs and API clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            TradeError::Validation(_) => "ERR_VALIDATION",
            TradeError::InstrumentNotFound { .. } => "ERR_INSTRUMENT_NOT_FOUND",
            TradeError::AccountNotFound { .. } => "ERR_ACCOUNT_NOT_FOUND",
            TradeError::InsufficientFunds { .. } => "ERR_INSUFFICIENT_FUNDS",
            TradeError::FailedToSaveOrder(_) => "ERR_SAVE_ORDER",
            TradeError::FailedToSaveHolding(_) => "ERR_SAVE_HOLDING",
            TradeError::FailedToSaveAccount(_) => "ERR_SAVE_ACCOUNT",
            TradeError::Persistence(_) => "ERR_PERSISTENCE",
        }
    }

    /// Message shown to the caller. Storage detail never leaves the process.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Persistence => {
                "Failed to execute trade, please try again later".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Failures assembling a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Account {account_id} not found")]
    AccountNotFound { account_id: AccountId },

    #[error("Instrument {symbol} not found")]
    InstrumentNotFound { symbol: String },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl SnapshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::AccountNotFound { .. } | SnapshotError::InstrumentNotFound { .. } => {
                ErrorKind::NotFound
            }
            SnapshotError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Persistence => "Failed to load data, please try again later".to_string(),
            _ => self.to_string(),
        }
    }
}

/// A push to one subscriber failed. Handled inside the hub, never surfaced to
/// other subscribers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Push failed: {0}")]
    PushFailed(String),

    #[error("Push timed out")]
    Timeout,

    #[error("Connection closed")]
    Closed,
}
