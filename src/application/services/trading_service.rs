//! Trading Service
//!
//! Request/response boundary over the engine and the snapshot builder. Every
//! operation returns an [`ApiResponse`]; nothing here returns `Err` or panics
//! to the caller. Work runs on its own task so a panic inside it becomes a
//! generic internal error instead of tearing down the connection.

use crate::application::actors::subscriber_hub::BroadcastTrigger;
use crate::domain::entities::account::AccountId;
use crate::domain::entities::order::{OrderSide, TradeRequest};
use crate::domain::entities::watchlist::WatchlistEntry;
use crate::domain::errors::{ErrorKind, ErrorSeverity, SnapshotError, TradeError, ValidationError};
use crate::domain::repositories::trading_store::{StoreError, TradingStore};
use crate::domain::services::execution_engine::{Execution, ExecutionEngine};
use crate::domain::services::snapshot_builder::{
    AccountSnapshot, MarketSnapshot, OrderView, SnapshotBuilder, WatchlistView,
};
use crate::domain::value_objects::money::Cents;
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// Why a request failed. Drives the HTTP status at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    NotFound,
    InsufficientFunds,
    Persistence,
    Unauthorized,
    Internal,
}

impl From<ErrorKind> for FailureKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => FailureKind::Validation,
            ErrorKind::NotFound => FailureKind::NotFound,
            ErrorKind::InsufficientFunds => FailureKind::InsufficientFunds,
            ErrorKind::Persistence => FailureKind::Persistence,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error_message: Option<String>,
    #[serde(skip)]
    pub failure: Option<FailureKind>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_message: None,
            failure: None,
        }
    }

    pub fn fail(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_message: Some(message.into()),
            failure: Some(kind),
        }
    }

    pub fn internal() -> Self {
        Self::fail(FailureKind::Internal, INTERNAL_ERROR_MESSAGE)
    }
}

impl<T> From<TradeError> for ApiResponse<T> {
    fn from(e: TradeError) -> Self {
        Self::fail(e.kind().into(), e.user_message())
    }
}

impl<T> From<SnapshotError> for ApiResponse<T> {
    fn from(e: SnapshotError) -> Self {
        Self::fail(e.kind().into(), e.user_message())
    }
}

impl<T> From<ValidationError> for ApiResponse<T> {
    fn from(e: ValidationError) -> Self {
        Self::fail(FailureKind::Validation, e.to_string())
    }
}

impl<T> From<StoreError> for ApiResponse<T> {
    fn from(_: StoreError) -> Self {
        Self::fail(
            FailureKind::Persistence,
            "Failed to save data, please try again later",
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HoldingView {
    pub symbol: String,
    pub quantity: i64,
    pub average_cost: f64,
}

/// What a trader sees after a fill.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TradeReceipt {
    pub orders: Vec<OrderView>,
    pub price: f64,
    pub notional: f64,
    pub position: HoldingView,
    pub cash_balance: f64,
    pub realized_pnl: f64,
}

impl From<&Execution> for TradeReceipt {
    fn from(execution: &Execution) -> Self {
        TradeReceipt {
            orders: execution.orders.iter().map(OrderView::from).collect(),
            price: execution.price().to_dollars(),
            notional: execution.total_notional().to_dollars(),
            position: HoldingView {
                symbol: execution.position.symbol.clone(),
                quantity: execution.position.quantity,
                average_cost: execution.position.average_cost.to_dollars(),
            },
            cash_balance: execution.cash_balance.to_dollars(),
            realized_pnl: execution.realized_pnl().to_dollars(),
        }
    }
}

/// Runs `work` on its own task; a panic becomes the generic internal error.
async fn guarded<T, F>(operation: &'static str, work: F) -> ApiResponse<T>
where
    F: Future<Output = ApiResponse<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(response) => response,
        Err(e) if e.is_panic() => {
            error!("{} panicked: {}", operation, e);
            ApiResponse::internal()
        }
        Err(e) => {
            error!("{} was cancelled: {}", operation, e);
            ApiResponse::internal()
        }
    }
}

#[derive(Clone)]
pub struct TradingService {
    engine: Arc<ExecutionEngine>,
    snapshots: SnapshotBuilder,
    store: Arc<dyn TradingStore>,
    dashboard_trigger: Option<BroadcastTrigger>,
}

impl TradingService {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        snapshots: SnapshotBuilder,
        store: Arc<dyn TradingStore>,
    ) -> Self {
        Self {
            engine,
            snapshots,
            store,
            dashboard_trigger: None,
        }
    }

    /// Fired after every successful trade so dashboards refresh without
    /// waiting for the next tick.
    pub fn with_dashboard_trigger(mut self, trigger: BroadcastTrigger) -> Self {
        self.dashboard_trigger = Some(trigger);
        self
    }

    fn refresh_dashboards(&self) {
        if let Some(trigger) = &self.dashboard_trigger {
            trigger.fire();
        }
    }

    pub async fn execute_trade(
        &self,
        account_id: AccountId,
        symbol: &str,
        side: &str,
        quantity: i64,
    ) -> ApiResponse<TradeReceipt> {
        let side: OrderSide = match side.parse() {
            Ok(side) => side,
            Err(e) => return ApiResponse::<TradeReceipt>::from(e),
        };
        let request = match TradeRequest::new(account_id, symbol, side, quantity) {
            Ok(request) => request,
            Err(e) => return ApiResponse::<TradeReceipt>::from(e),
        };

        let engine = self.engine.clone();
        let response = guarded("execute_trade", async move {
            match engine.execute(&request).await {
                Ok(execution) => ApiResponse::ok(TradeReceipt::from(&execution)),
                Err(e) => {
                    if e.severity() == ErrorSeverity::Critical {
                        error!(
                            "Trade failed for account {} ({}): {}",
                            request.account_id(),
                            e.error_code(),
                            e
                        );
                    } else {
                        warn!(
                            "Trade rejected for account {} ({}): {}",
                            request.account_id(),
                            e.error_code(),
                            e
                        );
                    }
                    ApiResponse::from(e)
                }
            }
        })
        .await;

        if response.success {
            self.refresh_dashboards();
        }
        response
    }

    pub async fn account_snapshot(&self, account_id: AccountId) -> ApiResponse<AccountSnapshot> {
        let snapshots = self.snapshots.clone();
        guarded("account_snapshot", async move {
            match snapshots.build_account_snapshot(account_id).await {
                Ok(snapshot) => ApiResponse::ok(snapshot),
                Err(e) => ApiResponse::from(e),
            }
        })
        .await
    }

    pub async fn market_snapshot(&self, symbol: &str) -> ApiResponse<MarketSnapshot> {
        let snapshots = self.snapshots.clone();
        let symbol = symbol.to_string();
        guarded("market_snapshot", async move {
            match snapshots.build_market_snapshot(&symbol).await {
                Ok(snapshot) => ApiResponse::ok(snapshot),
                Err(e) => ApiResponse::from(e),
            }
        })
        .await
    }

    pub async fn order_history(&self, account_id: AccountId) -> ApiResponse<Vec<OrderView>> {
        let snapshots = self.snapshots.clone();
        guarded("order_history", async move {
            match snapshots.order_history(account_id).await {
                Ok(orders) => ApiResponse::ok(orders),
                Err(e) => ApiResponse::from(e),
            }
        })
        .await
    }

    /// Adds or replaces the caller's alert on `symbol`.
    pub async fn add_watchlist_entry(
        &self,
        account_id: AccountId,
        symbol: &str,
        target_price: f64,
    ) -> ApiResponse<WatchlistView> {
        let target = match Cents::from_dollars(target_price) {
            Ok(target) if target.value() > 0 => target,
            Ok(_) => {
                return ApiResponse::fail(
                    FailureKind::Validation,
                    "Invalid price: target price must be positive",
                )
            }
            Err(e) => return ApiResponse::from(e),
        };

        let store = self.store.clone();
        let snapshots = self.snapshots.clone();
        let symbol = symbol.trim().to_uppercase();
        let response = guarded("add_watchlist_entry", async move {
            let instrument = match resolve_target(store.as_ref(), account_id, &symbol).await {
                Ok(instrument) => instrument,
                Err(response) => return response,
            };

            let entry = WatchlistEntry {
                account_id,
                instrument_id: instrument.id,
                symbol: instrument.symbol.clone(),
                target_price: target,
                is_active: true,
                created_at: Utc::now(),
            };
            if let Err(e) = store.upsert_watchlist_entry(&entry).await {
                return ApiResponse::from(e);
            }

            info!(
                "Account {} watching {} at {}",
                account_id, entry.symbol, entry.target_price
            );
            let current_price = snapshots.live_price(&instrument).await;
            ApiResponse::ok(WatchlistView {
                symbol: entry.symbol,
                target_price: entry.target_price.to_dollars(),
                current_price: current_price.to_dollars(),
                is_active: entry.is_active,
            })
        })
        .await;

        if response.success {
            self.refresh_dashboards();
        }
        response
    }

    pub async fn remove_watchlist_entry(&self, account_id: AccountId, symbol: &str) -> ApiResponse<()> {
        let store = self.store.clone();
        let symbol = symbol.trim().to_uppercase();
        let response = guarded("remove_watchlist_entry", async move {
            let instrument = match resolve_target(store.as_ref(), account_id, &symbol).await {
                Ok(instrument) => instrument,
                Err(response) => return response,
            };

            match store.delete_watchlist_entry(account_id, instrument.id).await {
                Ok(true) => {
                    info!("Account {} stopped watching {}", account_id, symbol);
                    ApiResponse::ok(())
                }
                Ok(false) => ApiResponse::fail(
                    FailureKind::NotFound,
                    format!("{} is not on the watchlist", symbol),
                ),
                Err(e) => ApiResponse::from(e),
            }
        })
        .await;

        if response.success {
            self.refresh_dashboards();
        }
        response
    }
}

/// Checks the account exists and resolves the instrument.
async fn resolve_target<T>(
    store: &dyn TradingStore,
    account_id: AccountId,
    symbol: &str,
) -> Result<crate::domain::entities::instrument::Instrument, ApiResponse<T>> {
    match store.get_account_by_id(account_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(SnapshotError::AccountNotFound { account_id }.into()),
        Err(e) => return Err(SnapshotError::from(e).into()),
    }
    match store.get_instrument_by_symbol(symbol).await {
        Ok(Some(instrument)) => Ok(instrument),
        Ok(None) => Err(SnapshotError::InstrumentNotFound {
            symbol: symbol.to_string(),
        }
        .into()),
        Err(e) => Err(SnapshotError::from(e).into()),
    }
}
