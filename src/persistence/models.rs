//! Database Models
//!
//! Row types for the ledger tables and their conversion into domain entities.
//! Conversions fail with `StoreError::Corrupt` when a stored value no longer
//! parses (an unknown side, for instance).

use crate::domain::entities::account::Account;
use crate::domain::entities::instrument::Instrument;
use crate::domain::entities::news::NewsArticle;
use crate::domain::entities::order::{OrderRecord, OrderSide, OrderStatus};
use crate::domain::entities::position::Position;
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::repositories::trading_store::StoreError;
use crate::domain::value_objects::money::Cents;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct InstrumentRow {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub opening_price_cents: i64,
    pub current_price_cents: i64,
    pub min_price_cents: i64,
    pub max_price_cents: i64,
    pub max_change_cents: i64,
    pub sentiment_score: f64,
    pub updated_at: DateTime<Utc>,
}

impl From<InstrumentRow> for Instrument {
    fn from(row: InstrumentRow) -> Self {
        Instrument {
            id: row.id,
            symbol: row.symbol,
            name: row.name,
            opening_price: Cents::new(row.opening_price_cents),
            current_price: Cents::new(row.current_price_cents),
            min_price: Cents::new(row.min_price_cents),
            max_price: Cents::new(row.max_price_cents),
            max_change: Cents::new(row.max_change_cents),
            sentiment_score: row.sentiment_score as f32,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub cash_balance_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            id: row.id,
            username: row.username,
            email: row.email,
            cash_balance: Cents::new(row.cash_balance_cents),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Position joined with its instrument symbol.
#[derive(Debug, Clone, FromRow)]
pub struct PositionRow {
    pub account_id: i64,
    pub instrument_id: i64,
    pub symbol: String,
    pub quantity: i64,
    pub average_cost_cents: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<PositionRow> for Position {
    fn from(row: PositionRow) -> Self {
        Position {
            account_id: row.account_id,
            instrument_id: row.instrument_id,
            symbol: row.symbol,
            quantity: row.quantity,
            average_cost: Cents::new(row.average_cost_cents),
            updated_at: row.updated_at,
        }
    }
}

/// Order joined with its instrument symbol.
#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub account_id: i64,
    pub instrument_id: i64,
    pub symbol: String,
    pub side: String,
    pub status: String,
    pub quantity: i64,
    pub price_cents: i64,
    pub notional_cents: i64,
    pub realized_pnl_cents: i64,
    pub executed_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for OrderRecord {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let side: OrderSide = row
            .side
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {}", row.id, e)))?;
        let status: OrderStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {}", row.id, e)))?;

        Ok(OrderRecord {
            id: row.id,
            account_id: row.account_id,
            instrument_id: row.instrument_id,
            symbol: row.symbol,
            side,
            status,
            quantity: row.quantity,
            price: Cents::new(row.price_cents),
            notional: Cents::new(row.notional_cents),
            realized_pnl: Cents::new(row.realized_pnl_cents),
            executed_at: row.executed_at,
        })
    }
}

/// Watchlist entry joined with its instrument symbol.
#[derive(Debug, Clone, FromRow)]
pub struct WatchlistRow {
    pub account_id: i64,
    pub instrument_id: i64,
    pub symbol: String,
    pub target_price_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<WatchlistRow> for WatchlistEntry {
    fn from(row: WatchlistRow) -> Self {
        WatchlistEntry {
            account_id: row.account_id,
            instrument_id: row.instrument_id,
            symbol: row.symbol,
            target_price: Cents::new(row.target_price_cents),
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NewsRow {
    pub id: i64,
    pub symbol: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub sentiment_score: f64,
}

impl From<NewsRow> for NewsArticle {
    fn from(row: NewsRow) -> Self {
        NewsArticle {
            id: row.id,
            symbol: row.symbol,
            title: row.title,
            summary: row.summary,
            url: row.url,
            published_at: row.published_at,
            sentiment_score: row.sentiment_score as f32,
        }
    }
}
