pub mod trading_store;

pub use trading_store::{StoreError, StoreResult, TradeUnit, TradingStore};
