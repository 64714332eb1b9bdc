pub mod trading_service;

pub use trading_service::{ApiResponse, FailureKind, TradingService};
