//! Execution Engine
//!
//! Turns a validated [`TradeRequest`] into one atomic set of ledger writes:
//! one or two orders, the updated position and the updated cash balance.
//!
//! ## Consistency
//! - Trades for one account are serialized by an in-process async mutex, on
//!   top of the store transaction. The mutex is dropped from the map once no
//!   trade for that account holds or awaits it.
//! - The instrument's price read guard is held from lookup to commit, so the
//!   price ticker cannot move the execution price mid-trade.
//! - Any failure drops the unit of work uncommitted, which discards every write.

use crate::domain::entities::account::AccountId;
use crate::domain::entities::order::{NewOrder, OrderRecord, OrderSide, TradeRequest};
use crate::domain::entities::position::Position;
use crate::domain::errors::{TradeError, ValidationError};
use crate::domain::repositories::trading_store::TradingStore;
use crate::domain::services::price_book::PriceBook;
use crate::domain::value_objects::money::Cents;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Result of one committed trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// One order, or two when the trade flipped the position through zero.
    pub orders: Vec<OrderRecord>,
    pub position: Position,
    pub cash_balance: Cents,
}

impl Execution {
    pub fn price(&self) -> Cents {
        self.orders.first().map(|o| o.price).unwrap_or(Cents::ZERO)
    }

    pub fn total_notional(&self) -> Cents {
        self.orders.iter().map(|o| o.notional).sum()
    }

    pub fn realized_pnl(&self) -> Cents {
        self.orders.iter().map(|o| o.realized_pnl).sum()
    }
}

type AccountLocks = StdMutex<HashMap<AccountId, Arc<Mutex<()>>>>;

fn lock_map(locks: &AccountLocks) -> std::sync::MutexGuard<'_, HashMap<AccountId, Arc<Mutex<()>>>> {
    match locks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Holds an account's trade mutex; releasing it prunes the map entry when
/// nobody else is using it.
struct AccountLease<'a> {
    locks: &'a AccountLocks,
    account_id: AccountId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AccountLease<'_> {
    fn drop(&mut self) {
        // Clones only happen under the map lock, so the count is stable here.
        let mut locks = lock_map(self.locks);
        self.guard.take();
        if locks
            .get(&self.account_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.account_id);
        }
    }
}

pub struct ExecutionEngine {
    store: Arc<dyn TradingStore>,
    prices: PriceBook,
    account_locks: AccountLocks,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn TradingStore>, prices: PriceBook) -> Self {
        Self {
            store,
            prices,
            account_locks: StdMutex::new(HashMap::new()),
        }
    }

    async fn lease_account(&self, account_id: AccountId) -> AccountLease<'_> {
        let lock = {
            let mut locks = lock_map(&self.account_locks);
            locks
                .entry(account_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        AccountLease {
            locks: &self.account_locks,
            account_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Accounts with a trade in flight.
    #[cfg(test)]
    fn active_accounts(&self) -> usize {
        lock_map(&self.account_locks).len()
    }

    /// Executes a trade at the instrument's current simulated price.
    ///
    /// # Errors
    /// - `InstrumentNotFound` / `AccountNotFound` when either lookup misses
    /// - `InsufficientFunds` when a buy costs more than the cash balance
    /// - `Validation` on arithmetic overflow
    /// - `FailedToSaveOrder`, `FailedToSaveHolding`, `FailedToSaveAccount` or
    ///   `Persistence` when the store rejects a write; nothing is kept
    pub async fn execute(&self, request: &TradeRequest) -> Result<Execution, TradeError> {
        let account_id = request.account_id();
        let side = request.side();
        let quantity = request.quantity();

        let _serialized = self.lease_account(account_id).await;

        let instrument = self
            .store
            .get_instrument_by_symbol(request.symbol())
            .await?
            .ok_or_else(|| TradeError::InstrumentNotFound {
                symbol: request.symbol().to_string(),
            })?;

        let cell = self.prices.upsert(&instrument).ok_or_else(|| {
            ValidationError::InvalidPrice(format!(
                "{} has invalid price bounds",
                instrument.symbol
            ))
        })?;
        let price_guard = cell.read().await;
        let price = price_guard.current;

        let mut unit = self.store.begin().await?;

        let mut account = unit
            .get_account(account_id)
            .await?
            .ok_or(TradeError::AccountNotFound { account_id })?;

        let mut position = unit
            .get_position(account_id, instrument.id)
            .await?
            .unwrap_or_else(|| Position::flat(account_id, instrument.id, &instrument.symbol));

        let total_notional = price
            .checked_mul(quantity)
            .ok_or(ValidationError::Overflow("order notional"))?;

        if side == OrderSide::Buy && !account.can_afford(total_notional) {
            warn!(
                "Rejected {} {} {} for account {}: needs {}, has {}",
                side, quantity, instrument.symbol, account_id, total_notional, account.cash_balance
            );
            return Err(TradeError::InsufficientFunds {
                required: total_notional,
                available: account.cash_balance,
            });
        }

        let legs = position.split_legs(side, quantity);
        let mut orders = Vec::with_capacity(legs.len());

        for leg in legs {
            let fill = position.apply_fill(side, leg, price)?;
            let now = Utc::now();

            let record = unit
                .insert_order(NewOrder {
                    account_id,
                    instrument_id: instrument.id,
                    symbol: instrument.symbol.clone(),
                    side,
                    quantity: leg,
                    price,
                    notional: fill.notional,
                    realized_pnl: fill.realized_pnl,
                    executed_at: now,
                })
                .await
                .map_err(|e| {
                    error!("Failed to save order for account {}: {}", account_id, e);
                    TradeError::FailedToSaveOrder(e)
                })?;

            unit.save_position(&position).await.map_err(|e| {
                error!("Failed to save holding for account {}: {}", account_id, e);
                TradeError::FailedToSaveHolding(e)
            })?;

            account.cash_balance = match side {
                OrderSide::Buy => account.cash_balance.checked_sub(fill.notional),
                OrderSide::Sell => account.cash_balance.checked_add(fill.notional),
            }
            .ok_or(ValidationError::Overflow("cash balance"))?;
            account.updated_at = now;

            unit.save_account(&account).await.map_err(|e| {
                error!("Failed to save account {}: {}", account_id, e);
                TradeError::FailedToSaveAccount(e)
            })?;

            debug!(
                "Order {} written: {} {} {} @ {}",
                record.id, side, leg, instrument.symbol, price
            );
            orders.push(record);
        }

        unit.commit().await.map_err(|e| {
            error!("Failed to commit trade for account {}: {}", account_id, e);
            TradeError::Persistence(e)
        })?;
        drop(price_guard);

        info!(
            "Executed {} {} {} @ {} for account {} ({} order(s), position {} @ {}, cash {})",
            side,
            quantity,
            instrument.symbol,
            price,
            account_id,
            orders.len(),
            position.quantity,
            position.average_cost,
            account.cash_balance
        );

        Ok(Execution {
            orders,
            position,
            cash_balance: account.cash_balance,
        })
    }
}
