//! Snapshot Builder
//!
//! Read-only views of an account or an instrument, computed from the store and
//! overlaid with live prices from the [`PriceBook`]. Building a snapshot never
//! writes anything.
//!
//! Monetary fields are dollars (`Cents::to_dollars`); percentages are rounded
//! to two decimals and reported as 0 when their denominator is zero.

use crate::domain::entities::account::AccountId;
use crate::domain::entities::instrument::Instrument;
use crate::domain::entities::news::NewsArticle;
use crate::domain::entities::order::OrderRecord;
use crate::domain::entities::position::Position;
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::errors::SnapshotError;
use crate::domain::repositories::trading_store::TradingStore;
use crate::domain::services::price_book::PriceBook;
use crate::domain::value_objects::money::{percent_of, Cents};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_INITIAL_INVESTMENT_CENTS: i64 = 10_000_000;
pub const DEFAULT_RECENT_NEWS_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentView {
    pub symbol: String,
    pub name: String,
    pub opening_price: f64,
    pub current_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub change: f64,
    /// Percent of the opening price, e.g. `2.5` for +2.5%.
    pub change_percent: f64,
    pub sentiment_score: f32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: AccountId,
    pub username: String,
    pub email: String,
    pub cash_balance: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub symbol: String,
    pub side: String,
    pub quantity: i64,
    pub average_cost: f64,
    pub current_price: f64,
    pub cost_basis: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub pnl_percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistView {
    pub symbol: String,
    pub target_price: f64,
    pub current_price: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioTotals {
    pub cash_balance: f64,
    pub total_holding_value: f64,
    pub total_pnl: f64,
    pub portfolio_value: f64,
    pub initial_investment: f64,
    pub return_percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub account: AccountView,
    pub instruments: Vec<InstrumentView>,
    pub positions: Vec<PositionView>,
    pub watchlist: Vec<WatchlistView>,
    pub totals: PortfolioTotals,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewsView {
    pub title: String,
    pub summary: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub sentiment_score: f32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub instrument: InstrumentView,
    pub recent_news: Vec<NewsView>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: i64,
    pub symbol: String,
    pub side: String,
    pub status: String,
    pub quantity: i64,
    pub price: f64,
    pub notional: f64,
    pub realized_pnl: f64,
    pub executed_at: DateTime<Utc>,
}

impl From<&OrderRecord> for OrderView {
    fn from(order: &OrderRecord) -> Self {
        OrderView {
            id: order.id,
            symbol: order.symbol.clone(),
            side: order.side.to_string(),
            status: order.status.as_str().to_string(),
            quantity: order.quantity,
            price: order.price.to_dollars(),
            notional: order.notional.to_dollars(),
            realized_pnl: order.realized_pnl.to_dollars(),
            executed_at: order.executed_at,
        }
    }
}

impl From<&NewsArticle> for NewsView {
    fn from(article: &NewsArticle) -> Self {
        NewsView {
            title: article.title.clone(),
            summary: article.summary.clone(),
            url: article.url.clone(),
            published_at: article.published_at,
            sentiment_score: article.sentiment_score,
        }
    }
}

#[derive(Clone)]
pub struct SnapshotBuilder {
    store: Arc<dyn TradingStore>,
    prices: PriceBook,
    initial_investment: Cents,
    recent_news_limit: usize,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn TradingStore>, prices: PriceBook) -> Self {
        Self {
            store,
            prices,
            initial_investment: Cents::new(DEFAULT_INITIAL_INVESTMENT_CENTS),
            recent_news_limit: DEFAULT_RECENT_NEWS_LIMIT,
        }
    }

    pub fn with_initial_investment(mut self, initial_investment: Cents) -> Self {
        self.initial_investment = initial_investment;
        self
    }

    pub fn with_recent_news_limit(mut self, limit: usize) -> Self {
        self.recent_news_limit = limit;
        self
    }

    pub async fn build_account_snapshot(
        &self,
        account_id: AccountId,
    ) -> Result<AccountSnapshot, SnapshotError> {
        let account = self
            .store
            .get_account_by_id(account_id)
            .await?
            .ok_or(SnapshotError::AccountNotFound { account_id })?;

        let live = self.prices.snapshot().await;
        let instruments = self.store.get_all_instruments().await?;
        let positions = self.store.get_positions_by_account(account_id).await?;
        let watchlist = self.store.get_watchlist_by_account(account_id).await?;

        let stored: HashMap<&str, Cents> = instruments
            .iter()
            .map(|i| (i.symbol.as_str(), i.current_price))
            .collect();
        let price_of = |symbol: &str| -> Cents {
            live.get(symbol)
                .or_else(|| stored.get(symbol))
                .copied()
                .unwrap_or(Cents::ZERO)
        };

        let instrument_views = instruments
            .iter()
            .map(|i| instrument_view(i, price_of(&i.symbol)))
            .collect();

        let open: Vec<&Position> = positions.iter().filter(|p| !p.is_flat()).collect();
        let position_views: Vec<PositionView> = open
            .iter()
            .map(|p| position_view(p, price_of(&p.symbol)))
            .collect();

        let total_holding_value: Cents = open
            .iter()
            .map(|p| p.market_value(price_of(&p.symbol)))
            .sum();
        let total_pnl: Cents = open
            .iter()
            .map(|p| p.unrealized_pnl(price_of(&p.symbol)))
            .sum();
        let portfolio_value = account.cash_balance + total_holding_value;

        let watchlist_views = watchlist
            .iter()
            .map(|w| watchlist_view(w, price_of(&w.symbol)))
            .collect();

        Ok(AccountSnapshot {
            account: AccountView {
                id: account.id,
                username: account.username.clone(),
                email: account.email.clone(),
                cash_balance: account.cash_balance.to_dollars(),
            },
            instruments: instrument_views,
            positions: position_views,
            watchlist: watchlist_views,
            totals: PortfolioTotals {
                cash_balance: account.cash_balance.to_dollars(),
                total_holding_value: total_holding_value.to_dollars(),
                total_pnl: total_pnl.to_dollars(),
                portfolio_value: portfolio_value.to_dollars(),
                initial_investment: self.initial_investment.to_dollars(),
                return_percent: percent_of(
                    portfolio_value - self.initial_investment,
                    self.initial_investment,
                ),
            },
        })
    }

    pub async fn build_market_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, SnapshotError> {
        let symbol = symbol.trim().to_uppercase();
        let instrument = self
            .store
            .get_instrument_by_symbol(&symbol)
            .await?
            .ok_or_else(|| SnapshotError::InstrumentNotFound {
                symbol: symbol.clone(),
            })?;

        let price = self.live_price(&instrument).await;
        let news = self
            .store
            .get_recent_news(&instrument.symbol, self.recent_news_limit)
            .await?;

        Ok(MarketSnapshot {
            instrument: instrument_view(&instrument, price),
            recent_news: news.iter().map(NewsView::from).collect(),
        })
    }

    /// Price book value, falling back to the stored price for symbols the book does not track.
    pub async fn live_price(&self, instrument: &Instrument) -> Cents {
        self.prices
            .current(&instrument.symbol)
            .await
            .unwrap_or(instrument.current_price)
    }

    pub async fn order_history(&self, account_id: AccountId) -> Result<Vec<OrderView>, SnapshotError> {
        if self.store.get_account_by_id(account_id).await?.is_none() {
            return Err(SnapshotError::AccountNotFound { account_id });
        }
        let orders = self.store.get_orders_by_account(account_id).await?;
        Ok(orders.iter().map(OrderView::from).collect())
    }
}

fn instrument_view(instrument: &Instrument, price: Cents) -> InstrumentView {
    let change = instrument.change_since_open(price);
    InstrumentView {
        symbol: instrument.symbol.clone(),
        name: instrument.name.clone(),
        opening_price: instrument.opening_price.to_dollars(),
        current_price: price.to_dollars(),
        min_price: instrument.min_price.to_dollars(),
        max_price: instrument.max_price.to_dollars(),
        change: change.to_dollars(),
        change_percent: percent_of(change, instrument.opening_price),
        sentiment_score: instrument.sentiment_score,
    }
}

fn position_view(position: &Position, price: Cents) -> PositionView {
    let cost_basis = position.cost_basis();
    let unrealized = position.unrealized_pnl(price);
    PositionView {
        symbol: position.symbol.clone(),
        side: position.side().to_string(),
        quantity: position.quantity,
        average_cost: position.average_cost.to_dollars(),
        current_price: price.to_dollars(),
        cost_basis: cost_basis.to_dollars(),
        market_value: position.market_value(price).to_dollars(),
        unrealized_pnl: unrealized.to_dollars(),
        pnl_percent: percent_of(unrealized, cost_basis),
    }
}

fn watchlist_view(entry: &WatchlistEntry, price: Cents) -> WatchlistView {
    WatchlistView {
        symbol: entry.symbol.clone(),
        target_price: entry.target_price.to_dollars(),
        current_price: price.to_dollars(),
        is_active: entry.is_active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::account::Account;
    use crate::persistence::memory::InMemoryTradingStore;

    fn instrument(id: i64, symbol: &str, opening: i64, current: i64) -> Instrument {
        Instrument {
            id,
            symbol: symbol.to_string(),
            name: format!("{} Corp", symbol),
            opening_price: Cents::new(opening),
            current_price: Cents::new(current),
            min_price: Cents::new(1),
            max_price: Cents::new(100_000),
            max_change: Cents::new(2),
            sentiment_score: 0.25,
            updated_at: Utc::now(),
        }
    }

    fn position(instrument_id: i64, symbol: &str, quantity: i64, avg: i64) -> Position {
        Position {
            account_id: 1,
            instrument_id,
            symbol: symbol.to_string(),
            quantity,
            average_cost: Cents::new(avg),
            updated_at: Utc::now(),
        }
    }

    fn setup() -> (Arc<InMemoryTradingStore>, PriceBook, SnapshotBuilder) {
        let store = Arc::new(InMemoryTradingStore::new());
        store.add_instrument(instrument(1, "LONG", 400, 500));
        store.add_instrument(instrument(2, "SHRT", 500, 450));
        store.add_instrument(instrument(3, "FLAT", 0, 300));
        store.add_account(Account {
            id: 1,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            cash_balance: Cents::new(9_000_000),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        store.add_position(position(1, "LONG", 100, 400));
        store.add_position(position(2, "SHRT", -20, 500));
        store.add_position(position(3, "FLAT", 0, 0));

        let prices = PriceBook::from_instruments(&store.instruments());
        let builder = SnapshotBuilder::new(store.clone(), prices.clone());
        (store, prices, builder)
    }

    #[tokio::test]
    async fn test_account_snapshot_totals() {
        let (_store, _prices, builder) = setup();

        let snapshot = builder.build_account_snapshot(1).await.unwrap();

        assert_eq!(snapshot.positions.len(), 2);
        let long = &snapshot.positions[0];
        assert_eq!(long.symbol, "LONG");
        assert_eq!(long.unrealized_pnl, 100.0);
        assert_eq!(long.cost_basis, 400.0);
        assert_eq!(long.pnl_percent, 25.0);

        let short = &snapshot.positions[1];
        assert_eq!(short.side, "SHORT");
        assert_eq!(short.unrealized_pnl, 10.0);
        assert_eq!(short.market_value, -90.0);
        assert_eq!(short.pnl_percent, 10.0);

        // 100*500 - 20*450
        assert_eq!(snapshot.totals.total_holding_value, 410.0);
        assert_eq!(snapshot.totals.total_pnl, 110.0);
        assert_eq!(snapshot.totals.portfolio_value, 90_410.0);
        assert_eq!(snapshot.totals.initial_investment, 100_000.0);
        assert_eq!(snapshot.totals.return_percent, -9.59);
    }

    #[tokio::test]
    async fn test_live_price_overrides_stored_price() {
        let (_store, prices, builder) = setup();
        prices.cell("LONG").unwrap().write().await.current = Cents::new(600);

        let snapshot = builder.build_account_snapshot(1).await.unwrap();
        assert_eq!(snapshot.positions[0].current_price, 6.0);
        assert_eq!(snapshot.positions[0].unrealized_pnl, 200.0);

        let market = builder.build_market_snapshot("long").await.unwrap();
        assert_eq!(market.instrument.current_price, 6.0);
        assert_eq!(market.instrument.change, 2.0);
        assert_eq!(market.instrument.change_percent, 50.0);
    }

    #[tokio::test]
    async fn test_zero_opening_price_reports_zero_percent() {
        let (_store, _prices, builder) = setup();
        let market = builder.build_market_snapshot("FLAT").await.unwrap();
        assert_eq!(market.instrument.change_percent, 0.0);
        assert_eq!(market.instrument.change, 3.0);
    }

    #[tokio::test]
    async fn test_zero_initial_investment_reports_zero_return() {
        let (store, prices, _builder) = setup();
        let builder = SnapshotBuilder::new(store, prices).with_initial_investment(Cents::ZERO);
        let snapshot = builder.build_account_snapshot(1).await.unwrap();
        assert_eq!(snapshot.totals.return_percent, 0.0);
    }

    #[tokio::test]
    async fn test_market_snapshot_news_limit() {
        let (store, prices, _builder) = setup();
        for i in 0..15 {
            store.add_news(NewsArticle {
                id: i,
                symbol: "LONG".to_string(),
                title: format!("headline {}", i),
                summary: String::new(),
                url: format!("https://news.example.com/{}", i),
                published_at: Utc::now() - chrono::Duration::minutes(i),
                sentiment_score: 0.1,
            });
        }

        let builder = SnapshotBuilder::new(store, prices).with_recent_news_limit(10);
        let market = builder.build_market_snapshot("LONG").await.unwrap();
        assert_eq!(market.recent_news.len(), 10);
        assert_eq!(market.recent_news[0].title, "headline 0");
    }

    #[tokio::test]
    async fn test_missing_account_and_instrument() {
        let (_store, _prices, builder) = setup();
        assert!(matches!(
            builder.build_account_snapshot(99).await,
            Err(SnapshotError::AccountNotFound { account_id: 99 })
        ));
        assert!(matches!(
            builder.build_market_snapshot("NOPE").await,
            Err(SnapshotError::InstrumentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_snapshot_serializes_camel_case() {
        let (_store, _prices, builder) = setup();
        let snapshot = builder.build_account_snapshot(1).await.unwrap();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["totals"]["portfolioValue"].is_number());
        assert!(json["account"]["cashBalance"].is_number());
        assert!(json["positions"][0]["unrealizedPnl"].is_number());
    }
}
