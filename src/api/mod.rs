//! HTTP API
//!
//! `router()` builds every route over a shared [`AppState`]. Cross-cutting
//! layers (CORS, rate limiting, request logging) are added by the binary.

pub mod backtest;
pub mod envelope;
pub mod market;
pub mod portfolio;
pub mod research;

use axum::{
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::market_data::PriceSource;
use crate::portfolio::PortfolioStore;
use crate::research::{JobQueue, JobRunner};

pub use envelope::{ok, ApiError, ApiResponse, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub prices: Arc<dyn PriceSource>,
    pub portfolio: PortfolioStore,
    pub runner: Arc<JobRunner>,
    pub queue: Arc<JobQueue>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/backtest/technical", post(backtest::post_technical_backtest))
        .route("/api/backtest/strategies", get(backtest::get_strategies))
        .route("/api/stocks/historical/:symbol", get(market::get_historical))
        .route("/api/research/analyze", post(research::post_analyze))
        .route("/api/research/jobs", post(research::post_job))
        .route("/api/research/jobs/:job_id", get(research::get_job))
        .route("/api/research/results/:symbol", get(research::get_results))
        .route("/api/research/alerts", get(research::get_alerts))
        .route(
            "/api/research/stocks",
            get(research::get_stocks).post(research::post_stock),
        )
        .route(
            "/api/research/stocks/:symbol/jobs",
            get(research::get_stock_jobs),
        )
        .route("/api/users/:user_id/portfolio", get(portfolio::get_portfolio))
        .route(
            "/api/users/:user_id/portfolio/initialize",
            post(portfolio::post_initialize),
        )
        .route(
            "/api/users/:user_id/trades",
            get(portfolio::get_trades).post(portfolio::post_trade),
        )
        .route("/api/users/:user_id/positions", get(portfolio::get_positions))
        .route(
            "/api/users/:user_id/watchlist",
            get(portfolio::get_watchlist).post(portfolio::post_watchlist),
        )
        .route(
            "/api/users/:user_id/watchlist/:symbol",
            delete(portfolio::delete_watchlist),
        )
        .with_state(state);

    Router::new().route("/health", get(health_check)).merge(api)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "tradedesk-backend",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
