//! In-memory trading store.
//!
//! Used by unit tests and by anything that wants the engine without SQLite.
//! One trade unit runs at a time: `begin` takes the writer gate, works on a
//! copy of the state and publishes it on `commit`. Dropping the unit discards
//! the copy.
//!
//! Faults can be injected per write step to exercise rollback paths.

use crate::domain::entities::account::{Account, AccountId};
use crate::domain::entities::instrument::Instrument;
use crate::domain::entities::news::NewsArticle;
use crate::domain::entities::order::{NewOrder, OrderRecord};
use crate::domain::entities::position::Position;
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::repositories::trading_store::{
    StoreError, StoreResult, TradeUnit, TradingStore,
};
use crate::domain::value_objects::money::Cents;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertOrder,
    SavePosition,
    SaveAccount,
    Commit,
    SavePrices,
}

#[derive(Debug, Clone, Default)]
struct State {
    instruments: BTreeMap<String, Instrument>,
    accounts: HashMap<AccountId, Account>,
    positions: HashMap<(AccountId, i64), Position>,
    orders: Vec<OrderRecord>,
    watchlist: HashMap<(AccountId, i64), WatchlistEntry>,
    news: Vec<NewsArticle>,
    next_order_id: i64,
}

/// Number of calls to let through before each armed fail point starts failing.
type Faults = Arc<Mutex<HashMap<FailPoint, usize>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn check_fault(faults: &Faults, point: FailPoint) -> StoreResult<()> {
    let mut faults = lock(faults);
    match faults.get_mut(&point) {
        Some(0) => Err(StoreError::Query(format!("injected failure at {:?}", point))),
        Some(remaining) => {
            *remaining -= 1;
            Ok(())
        }
        None => Ok(()),
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTradingStore {
    state: Arc<Mutex<State>>,
    writer: Arc<AsyncMutex<()>>,
    faults: Faults,
    price_saves: Arc<AtomicUsize>,
}

impl InMemoryTradingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instrument(&self, instrument: Instrument) {
        lock(&self.state)
            .instruments
            .insert(instrument.symbol.clone(), instrument);
    }

    pub fn add_account(&self, account: Account) {
        lock(&self.state).accounts.insert(account.id, account);
    }

    pub fn add_position(&self, position: Position) {
        lock(&self.state)
            .positions
            .insert((position.account_id, position.instrument_id), position);
    }

    pub fn add_news(&self, article: NewsArticle) {
        lock(&self.state).news.push(article);
    }

    pub fn instruments(&self) -> Vec<Instrument> {
        lock(&self.state).instruments.values().cloned().collect()
    }

    /// Fails the first and every later call at `point`.
    pub fn fail_at(&self, point: FailPoint) {
        self.fail_at_nth(point, 1);
    }

    /// Lets `nth - 1` calls at `point` succeed, then fails every later one.
    pub fn fail_at_nth(&self, point: FailPoint, nth: usize) {
        lock(&self.faults).insert(point, nth.saturating_sub(1));
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// Successful `save_prices` batches so far.
    pub fn price_saves(&self) -> usize {
        self.price_saves.load(Ordering::SeqCst)
    }
}

fn sorted_by_symbol<T>(mut items: Vec<T>, symbol: impl Fn(&T) -> &str) -> Vec<T> {
    items.sort_by(|a, b| symbol(a).cmp(symbol(b)));
    items
}

#[async_trait]
impl TradingStore for InMemoryTradingStore {
    async fn get_all_instruments(&self) -> StoreResult<Vec<Instrument>> {
        Ok(self.instruments())
    }

    async fn get_instrument_by_symbol(&self, symbol: &str) -> StoreResult<Option<Instrument>> {
        Ok(lock(&self.state).instruments.get(symbol).cloned())
    }

    async fn get_account_by_id(&self, account_id: AccountId) -> StoreResult<Option<Account>> {
        Ok(lock(&self.state).accounts.get(&account_id).cloned())
    }

    async fn get_position(
        &self,
        account_id: AccountId,
        instrument_id: i64,
    ) -> StoreResult<Option<Position>> {
        Ok(lock(&self.state)
            .positions
            .get(&(account_id, instrument_id))
            .cloned())
    }

    async fn get_positions_by_account(&self, account_id: AccountId) -> StoreResult<Vec<Position>> {
        let positions = lock(&self.state)
            .positions
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect();
        Ok(sorted_by_symbol(positions, |p: &Position| &p.symbol))
    }

    async fn get_watchlist_by_account(
        &self,
        account_id: AccountId,
    ) -> StoreResult<Vec<WatchlistEntry>> {
        let entries = lock(&self.state)
            .watchlist
            .values()
            .filter(|w| w.account_id == account_id)
            .cloned()
            .collect();
        Ok(sorted_by_symbol(entries, |w: &WatchlistEntry| &w.symbol))
    }

    async fn get_recent_news(&self, symbol: &str, limit: usize) -> StoreResult<Vec<NewsArticle>> {
        let mut news: Vec<NewsArticle> = lock(&self.state)
            .news
            .iter()
            .filter(|n| n.symbol == symbol)
            .cloned()
            .collect();
        news.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(b.id.cmp(&a.id)));
        news.truncate(limit);
        Ok(news)
    }

    async fn get_orders_by_account(&self, account_id: AccountId) -> StoreResult<Vec<OrderRecord>> {
        Ok(lock(&self.state)
            .orders
            .iter()
            .rev()
            .filter(|o| o.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn save_prices(&self, prices: &[(String, Cents)]) -> StoreResult<()> {
        check_fault(&self.faults, FailPoint::SavePrices)?;

        let mut state = lock(&self.state);
        let now = Utc::now();
        for (symbol, price) in prices {
            if let Some(instrument) = state.instruments.get_mut(symbol) {
                instrument.current_price = *price;
                instrument.updated_at = now;
            }
        }
        self.price_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_watchlist_entry(&self, entry: &WatchlistEntry) -> StoreResult<()> {
        lock(&self.state)
            .watchlist
            .insert((entry.account_id, entry.instrument_id), entry.clone());
        Ok(())
    }

    async fn delete_watchlist_entry(
        &self,
        account_id: AccountId,
        instrument_id: i64,
    ) -> StoreResult<bool> {
        Ok(lock(&self.state)
            .watchlist
            .remove(&(account_id, instrument_id))
            .is_some())
    }

    async fn begin(&self) -> StoreResult<Box<dyn TradeUnit>> {
        let gate = self.writer.clone().lock_owned().await;
        let working = lock(&self.state).clone();
        Ok(Box::new(InMemoryTradeUnit {
            _gate: gate,
            working,
            shared: self.state.clone(),
            faults: self.faults.clone(),
        }))
    }
}

pub struct InMemoryTradeUnit {
    _gate: OwnedMutexGuard<()>,
    working: State,
    shared: Arc<Mutex<State>>,
    faults: Faults,
}

#[async_trait]
impl TradeUnit for InMemoryTradeUnit {
    async fn get_account(&mut self, account_id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.working.accounts.get(&account_id).cloned())
    }

    async fn get_position(
        &mut self,
        account_id: AccountId,
        instrument_id: i64,
    ) -> StoreResult<Option<Position>> {
        Ok(self
            .working
            .positions
            .get(&(account_id, instrument_id))
            .cloned())
    }

    async fn insert_order(&mut self, order: NewOrder) -> StoreResult<OrderRecord> {
        check_fault(&self.faults, FailPoint::InsertOrder)?;
        self.working.next_order_id += 1;
        let record = OrderRecord::from_new(self.working.next_order_id, order);
        self.working.orders.push(record.clone());
        Ok(record)
    }

    async fn save_position(&mut self, position: &Position) -> StoreResult<()> {
        check_fault(&self.faults, FailPoint::SavePosition)?;
        self.working
            .positions
            .insert((position.account_id, position.instrument_id), position.clone());
        Ok(())
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<()> {
        check_fault(&self.faults, FailPoint::SaveAccount)?;
        match self.working.accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("account {}", account.id))),
        }
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        check_fault(&self.faults, FailPoint::Commit)?;
        let unit = *self;
        *lock(&unit.shared) = unit.working;
        Ok(())
    }
}
