//! HTTP and WebSocket surface.

pub mod stream_handler;
pub mod trading_handler;

use crate::application::actors::snapshot_sources::{DashboardHub, MarketHub};
use crate::application::services::trading_service::{ApiResponse, FailureKind, TradingService};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub service: TradingService,
    pub dashboard_hub: DashboardHub,
    pub market_hub: MarketHub,
}

impl FailureKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FailureKind::Validation => StatusCode::BAD_REQUEST,
            FailureKind::NotFound => StatusCode::NOT_FOUND,
            FailureKind::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
            FailureKind::Unauthorized => StatusCode::UNAUTHORIZED,
            FailureKind::Persistence | FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = match self.failure {
            Some(kind) => kind.status_code(),
            None if self.success => StatusCode::OK,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(trading_handler::health_check))
        .route("/dashboard", get(trading_handler::get_dashboard))
        .route("/orders", get(trading_handler::get_orders))
        .route("/trades", post(trading_handler::place_trade))
        .route("/market/:symbol", get(trading_handler::get_market))
        .route("/watchlist", post(trading_handler::add_watchlist_entry))
        .route("/watchlist/:symbol", delete(trading_handler::remove_watchlist_entry))
        .route("/ws/dashboard", get(stream_handler::dashboard_stream))
        .route("/ws/market/:symbol", get(stream_handler::market_stream))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_status_mapping() {
        let cases = [
            (FailureKind::Validation, StatusCode::BAD_REQUEST),
            (FailureKind::NotFound, StatusCode::NOT_FOUND),
            (FailureKind::InsufficientFunds, StatusCode::UNPROCESSABLE_ENTITY),
            (FailureKind::Unauthorized, StatusCode::UNAUTHORIZED),
            (FailureKind::Persistence, StatusCode::INTERNAL_SERVER_ERROR),
            (FailureKind::Internal, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (kind, status) in cases {
            let response = ApiResponse::<()>::fail(kind, "nope").into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn test_success_is_ok() {
        let response = ApiResponse::ok(5_i64).into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
