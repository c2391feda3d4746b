//! Paper-trading routes, keyed by user id.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::info;

use super::envelope::{ok, ApiError, ApiResult};
use super::AppState;
use crate::portfolio::{
    Portfolio, Position, Trade, TradeReceipt, TradeRequest, WatchlistItem, WatchlistRequest,
    STARTING_CASH,
};

fn portfolio_not_found() -> ApiError {
    ApiError::NotFound("Portfolio not found".to_string())
}

/// GET /api/users/:user_id/portfolio
pub async fn get_portfolio(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Portfolio> {
    state
        .portfolio
        .get(&user_id)?
        .map(ok)
        .ok_or_else(portfolio_not_found)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Initialized {
    pub portfolio: Portfolio,
    pub created: bool,
    pub message: String,
}

/// POST /api/users/:user_id/portfolio/initialize
pub async fn post_initialize(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Initialized> {
    let (portfolio, created) = state.portfolio.initialize(&user_id)?;
    let message = if created {
        format!("Portfolio initialized with ${:.0} play money", STARTING_CASH)
    } else {
        "Portfolio already initialized".to_string()
    };
    Ok(ok(Initialized {
        portfolio,
        created,
        message,
    }))
}

/// GET /api/users/:user_id/trades
pub async fn get_trades(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<Trade>> {
    Ok(ok(state.portfolio.list_trades(&user_id)?))
}

/// POST /api/users/:user_id/trades
pub async fn post_trade(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<TradeRequest>,
) -> ApiResult<TradeReceipt> {
    let order = req.validate()?;
    let receipt = state.portfolio.execute_trade(&user_id, &order)?;
    info!(
        user_id = %user_id,
        symbol = %receipt.symbol,
        action = receipt.action.as_str(),
        shares = receipt.shares,
        price = receipt.price,
        "💱 Paper trade executed"
    );
    Ok(ok(receipt))
}

/// GET /api/users/:user_id/positions
pub async fn get_positions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<Position>> {
    Ok(ok(state.portfolio.open_positions(&user_id)?))
}

/// GET /api/users/:user_id/watchlist
pub async fn get_watchlist(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<WatchlistItem>> {
    Ok(ok(state.portfolio.watchlist(&user_id)?))
}

/// POST /api/users/:user_id/watchlist
pub async fn post_watchlist(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<WatchlistRequest>,
) -> ApiResult<WatchlistItem> {
    if req.symbol.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing required parameter: symbol".to_string()));
    }
    Ok(ok(state
        .portfolio
        .add_to_watchlist(&user_id, &req.symbol, req.name.as_deref())?))
}

/// DELETE /api/users/:user_id/watchlist/:symbol
pub async fn delete_watchlist(
    State(state): State<AppState>,
    Path((user_id, symbol)): Path<(String, String)>,
) -> ApiResult<String> {
    if state.portfolio.remove_from_watchlist(&user_id, &symbol)? {
        Ok(ok(symbol.trim().to_uppercase()))
    } else {
        Err(ApiError::NotFound(format!("{} is not on the watchlist", symbol)))
    }
}
