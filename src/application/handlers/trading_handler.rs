use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::AppState;
use crate::application::services::trading_service::{ApiResponse, FailureKind, TradeReceipt};
use crate::auth::AccountIdentity;
use crate::domain::services::snapshot_builder::{
    AccountSnapshot, MarketSnapshot, OrderView, WatchlistView,
};

/// Body of `POST /trades`
#[derive(Debug, Deserialize)]
pub struct TradeBody {
    pub symbol: String,
    pub side: String,
    pub quantity: i64,
}

/// Body of `POST /watchlist`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistBody {
    pub symbol: String,
    pub target_price: f64,
}

fn invalid_body<T>(rejection: JsonRejection) -> ApiResponse<T> {
    let detail = rejection.body_text();
    warn!("Rejected request body: {}", detail);
    ApiResponse::fail(
        FailureKind::Validation,
        format!("Invalid request body: {}", detail),
    )
}

/// Liveness plus subscriber counts per hub
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let dashboards = state.dashboard_hub.subscriber_count().await;
    let markets = state.market_hub.subscriber_count().await;

    Json(json!({
        "status": "running",
        "dashboardSubscribers": dashboards,
        "marketSubscribers": markets,
        "hubsHealthy": !state.dashboard_hub.is_closed() && !state.market_hub.is_closed(),
    }))
}

pub async fn get_dashboard(
    identity: AccountIdentity,
    State(state): State<AppState>,
) -> ApiResponse<AccountSnapshot> {
    state.service.account_snapshot(identity.account_id()).await
}

pub async fn get_orders(
    identity: AccountIdentity,
    State(state): State<AppState>,
) -> ApiResponse<Vec<OrderView>> {
    state.service.order_history(identity.account_id()).await
}

pub async fn place_trade(
    identity: AccountIdentity,
    State(state): State<AppState>,
    body: Result<Json<TradeBody>, JsonRejection>,
) -> ApiResponse<TradeReceipt> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_body(rejection),
    };

    state
        .service
        .execute_trade(identity.account_id(), &body.symbol, &body.side, body.quantity)
        .await
}

pub async fn get_market(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> ApiResponse<MarketSnapshot> {
    state.service.market_snapshot(&symbol).await
}

pub async fn add_watchlist_entry(
    identity: AccountIdentity,
    State(state): State<AppState>,
    body: Result<Json<WatchlistBody>, JsonRejection>,
) -> ApiResponse<WatchlistView> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_body(rejection),
    };

    state
        .service
        .add_watchlist_entry(identity.account_id(), &body.symbol, body.target_price)
        .await
}

pub async fn remove_watchlist_entry(
    identity: AccountIdentity,
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> ApiResponse<()> {
    state
        .service
        .remove_watchlist_entry(identity.account_id(), &symbol)
        .await
}
