//! Persistence Port
//!
//! The `TradingStore` trait is the only way the execution engine and the
//! snapshot builder reach storage. Writes that belong to one trade go through a
//! `TradeUnit`, which is committed once or rolled back when dropped.
//!
//! ## Implementations
//! - `persistence::repository::SqliteTradingStore` (sqlx transactions)
//! - `persistence::memory::InMemoryTradingStore` (tests, fault injection)

use crate::domain::entities::account::{Account, AccountId};
use crate::domain::entities::instrument::Instrument;
use crate::domain::entities::news::NewsArticle;
use crate::domain::entities::order::{NewOrder, OrderRecord};
use crate::domain::entities::position::Position;
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::value_objects::money::Cents;
use async_trait::async_trait;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Read access and unit-of-work factory.
#[async_trait]
pub trait TradingStore: Send + Sync {
    async fn get_all_instruments(&self) -> StoreResult<Vec<Instrument>>;

    async fn get_instrument_by_symbol(&self, symbol: &str) -> StoreResult<Option<Instrument>>;

    async fn get_account_by_id(&self, account_id: AccountId) -> StoreResult<Option<Account>>;

    async fn get_position(
        &self,
        account_id: AccountId,
        instrument_id: i64,
    ) -> StoreResult<Option<Position>>;

    async fn get_positions_by_account(&self, account_id: AccountId) -> StoreResult<Vec<Position>>;

    async fn get_watchlist_by_account(
        &self,
        account_id: AccountId,
    ) -> StoreResult<Vec<WatchlistEntry>>;

    /// Most recent first.
    async fn get_recent_news(&self, symbol: &str, limit: usize) -> StoreResult<Vec<NewsArticle>>;

    /// Most recent first.
    async fn get_orders_by_account(&self, account_id: AccountId) -> StoreResult<Vec<OrderRecord>>;

    /// Persists the current price of every listed instrument in one batch.
    async fn save_prices(&self, prices: &[(String, Cents)]) -> StoreResult<()>;

    /// Inserts or replaces the entry for (account, instrument).
    async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> StoreResult<()>;

    /// Returns whether an entry was removed.
    async fn delete_watchlist_entry(
        &self,
        account_id: AccountId,
        instrument_id: i64,
    ) -> StoreResult<bool>;

    /// Opens an atomic unit of work for one trade.
    async fn begin(&self) -> StoreResult<Box<dyn TradeUnit>>;
}

/// One atomic trade. Dropping without `commit` discards every write.
#[async_trait]
pub trait TradeUnit: Send {
    async fn get_account(&mut self, account_id: AccountId) -> StoreResult<Option<Account>>;

    async fn get_position(
        &mut self,
        account_id: AccountId,
        instrument_id: i64,
    ) -> StoreResult<Option<Position>>;

    async fn insert_order(&mut self, order: NewOrder) -> StoreResult<OrderRecord>;

    /// Creates the row on first trade, updates it afterwards.
    async fn save_position(&mut self, position: &Position) -> StoreResult<()>;

    async fn save_account(&mut self, account: &Account) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
