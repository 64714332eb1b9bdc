//! Database Repository
//!
//! sqlx implementation of the trading store. A trade unit owns one pooled
//! connection inside `BEGIN IMMEDIATE`, so it holds the write lock from its
//! first read; dropping it without `commit` rolls everything back.

use super::models::*;
use super::DbPool;
use crate::domain::entities::account::{Account, AccountId};
use crate::domain::entities::instrument::Instrument;
use crate::domain::entities::news::NewsArticle;
use crate::domain::entities::order::{NewOrder, OrderRecord, OrderStatus};
use crate::domain::entities::position::Position;
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::repositories::trading_store::{
    StoreError, StoreResult, TradeUnit, TradingStore,
};
use crate::domain::value_objects::money::Cents;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection};
use tracing::{debug, error, warn};

const INSTRUMENT_COLUMNS: &str = "id, symbol, name, opening_price_cents, current_price_cents, \
     min_price_cents, max_price_cents, max_change_cents, sentiment_score, updated_at";

const POSITION_SELECT: &str = r#"
    SELECT p.account_id, p.instrument_id, i.symbol, p.quantity, p.average_cost_cents, p.updated_at
    FROM positions p
    JOIN instruments i ON i.id = p.instrument_id
"#;

const ACCOUNT_SELECT: &str =
    "SELECT id, username, email, cash_balance_cents, created_at, updated_at FROM accounts WHERE id = ?1";

fn store_error(context: &str, e: sqlx::Error) -> StoreError {
    error!("{}: {}", context, e);
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(format!("{}: {}", context, e))
        }
        _ => StoreError::Query(format!("{}: {}", context, e)),
    }
}

pub struct SqliteTradingStore {
    pool: DbPool,
}

impl SqliteTradingStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl TradingStore for SqliteTradingStore {
    async fn get_all_instruments(&self) -> StoreResult<Vec<Instrument>> {
        let rows = sqlx::query_as::<_, InstrumentRow>(&format!(
            "SELECT {} FROM instruments ORDER BY symbol",
            INSTRUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to load instruments", e))?;

        Ok(rows.into_iter().map(Instrument::from).collect())
    }

    async fn get_instrument_by_symbol(&self, symbol: &str) -> StoreResult<Option<Instrument>> {
        let row = sqlx::query_as::<_, InstrumentRow>(&format!(
            "SELECT {} FROM instruments WHERE symbol = ?1",
            INSTRUMENT_COLUMNS
        ))
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error(&format!("Failed to get instrument {}", symbol), e))?;

        Ok(row.map(Instrument::from))
    }

    async fn get_account_by_id(&self, account_id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(ACCOUNT_SELECT)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error(&format!("Failed to get account {}", account_id), e))?;

        Ok(row.map(Account::from))
    }

    async fn get_position(
        &self,
        account_id: AccountId,
        instrument_id: i64,
    ) -> StoreResult<Option<Position>> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "{} WHERE p.account_id = ?1 AND p.instrument_id = ?2",
            POSITION_SELECT
        ))
        .bind(account_id)
        .bind(instrument_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to get position", e))?;

        Ok(row.map(Position::from))
    }

    async fn get_positions_by_account(&self, account_id: AccountId) -> StoreResult<Vec<Position>> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            "{} WHERE p.account_id = ?1 ORDER BY i.symbol",
            POSITION_SELECT
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list positions", e))?;

        Ok(rows.into_iter().map(Position::from).collect())
    }

    async fn get_watchlist_by_account(
        &self,
        account_id: AccountId,
    ) -> StoreResult<Vec<WatchlistEntry>> {
        let rows = sqlx::query_as::<_, WatchlistRow>(
            r#"
            SELECT w.account_id, w.instrument_id, i.symbol, w.target_price_cents,
                   w.is_active, w.created_at
            FROM watchlist w
            JOIN instruments i ON i.id = w.instrument_id
            WHERE w.account_id = ?1
            ORDER BY i.symbol
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list watchlist", e))?;

        Ok(rows.into_iter().map(WatchlistEntry::from).collect())
    }

    async fn get_recent_news(&self, symbol: &str, limit: usize) -> StoreResult<Vec<NewsArticle>> {
        let rows = sqlx::query_as::<_, NewsRow>(
            r#"
            SELECT id, symbol, title, summary, url, published_at, sentiment_score
            FROM news_articles
            WHERE symbol = ?1
            ORDER BY published_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error(&format!("Failed to load news for {}", symbol), e))?;

        Ok(rows.into_iter().map(NewsArticle::from).collect())
    }

    async fn get_orders_by_account(&self, account_id: AccountId) -> StoreResult<Vec<OrderRecord>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT o.id, o.account_id, o.instrument_id, i.symbol, o.side, o.status,
                   o.quantity, o.price_cents, o.notional_cents, o.realized_pnl_cents,
                   o.executed_at
            FROM orders o
            JOIN instruments i ON i.id = o.instrument_id
            WHERE o.account_id = ?1
            ORDER BY o.executed_at DESC, o.id DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list orders", e))?;

        rows.into_iter().map(OrderRecord::try_from).collect()
    }

    async fn save_prices(&self, prices: &[(String, Cents)]) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to begin price batch", e))?;
        let now = Utc::now();

        for (symbol, price) in prices {
            sqlx::query(
                "UPDATE instruments SET current_price_cents = ?1, updated_at = ?2 WHERE symbol = ?3",
            )
            .bind(price.value())
            .bind(now)
            .bind(symbol)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error(&format!("Failed to save price for {}", symbol), e))?;
        }

        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit price batch", e))?;

        debug!("Saved {} prices", prices.len());
        Ok(())
    }

    async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO watchlist (account_id, instrument_id, target_price_cents, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(account_id, instrument_id) DO UPDATE SET
                target_price_cents = excluded.target_price_cents,
                is_active = excluded.is_active
            "#,
        )
        .bind(entry.account_id)
        .bind(entry.instrument_id)
        .bind(entry.target_price.value())
        .bind(entry.is_active)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("Failed to save watchlist entry", e))?;

        Ok(())
    }

    async fn delete_watchlist_entry(
        &self,
        account_id: AccountId,
        instrument_id: i64,
    ) -> StoreResult<bool> {
        let rows = sqlx::query("DELETE FROM watchlist WHERE account_id = ?1 AND instrument_id = ?2")
            .bind(account_id)
            .bind(instrument_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("Failed to delete watchlist entry", e))?
            .rows_affected();

        Ok(rows > 0)
    }

    async fn begin(&self) -> StoreResult<Box<dyn TradeUnit>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| store_error("Failed to acquire connection for trade", e))?;

        // A deferred transaction that reads first cannot always upgrade to a
        // writer; take the write lock up front and let busy_timeout queue us.
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| store_error("Failed to begin trade", e))?;

        Ok(Box::new(SqliteTradeUnit { conn: Some(conn) }))
    }
}

pub struct SqliteTradeUnit {
    conn: Option<PoolConnection<Sqlite>>,
}

impl SqliteTradeUnit {
    fn conn(&mut self) -> StoreResult<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| StoreError::Connection("trade unit already finished".to_string()))
    }
}

impl Drop for SqliteTradeUnit {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match sqlx::query("ROLLBACK").execute(&mut *conn).await {
                        Ok(_) => debug!("Trade unit rolled back"),
                        Err(e) => {
                            warn!("Rollback failed, discarding connection: {}", e);
                            if let Err(e) = conn.close().await {
                                debug!("Closing connection failed: {}", e);
                            }
                        }
                    }
                });
            }
            // Closing the raw connection makes SQLite discard the transaction
            Err(_) => drop(conn.detach()),
        }
    }
}

#[async_trait]
impl TradeUnit for SqliteTradeUnit {
    async fn get_account(&mut self, account_id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(ACCOUNT_SELECT)
            .bind(account_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| store_error(&format!("Failed to get account {}", account_id), e))?;

        Ok(row.map(Account::from))
    }

    async fn get_position(
        &mut self,
        account_id: AccountId,
        instrument_id: i64,
    ) -> StoreResult<Option<Position>> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "{} WHERE p.account_id = ?1 AND p.instrument_id = ?2",
            POSITION_SELECT
        ))
        .bind(account_id)
        .bind(instrument_id)
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| store_error("Failed to get position", e))?;

        Ok(row.map(Position::from))
    }

    async fn insert_order(&mut self, order: NewOrder) -> StoreResult<OrderRecord> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (
                account_id, instrument_id, side, status, quantity,
                price_cents, notional_cents, realized_pnl_cents, executed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING id
            "#,
        )
        .bind(order.account_id)
        .bind(order.instrument_id)
        .bind(order.side.as_str())
        .bind(OrderStatus::Executed.as_str())
        .bind(order.quantity)
        .bind(order.price.value())
        .bind(order.notional.value())
        .bind(order.realized_pnl.value())
        .bind(order.executed_at)
        .fetch_one(self.conn()?)
        .await
        .map_err(|e| store_error("Failed to insert order", e))?;

        Ok(OrderRecord::from_new(id, order))
    }

    async fn save_position(&mut self, position: &Position) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (account_id, instrument_id, quantity, average_cost_cents, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(account_id, instrument_id) DO UPDATE SET
                quantity = excluded.quantity,
                average_cost_cents = excluded.average_cost_cents,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(position.account_id)
        .bind(position.instrument_id)
        .bind(position.quantity)
        .bind(position.average_cost.value())
        .bind(position.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(|e| store_error("Failed to save position", e))?;

        Ok(())
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<()> {
        let rows = sqlx::query(
            "UPDATE accounts SET cash_balance_cents = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(account.cash_balance.value())
        .bind(account.updated_at)
        .bind(account.id)
        .execute(self.conn()?)
        .await
        .map_err(|e| store_error(&format!("Failed to save account {}", account.id), e))?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::NotFound(format!("account {}", account.id)));
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        sqlx::query("COMMIT")
            .execute(self.conn()?)
            .await
            .map_err(|e| store_error("Failed to commit trade", e))?;
        // Committed; nothing left for Drop to roll back
        self.conn = None;
        Ok(())
    }
}
