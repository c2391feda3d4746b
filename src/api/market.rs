//! Historical price route.

use axum::extract::{Path, Query, State};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::{ok, ApiError, ApiResult};
use super::AppState;
use crate::market_data::{normalize_symbol, Bar};

/// Window used when `start` is omitted.
const DEFAULT_LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct HistoricalQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalData {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub data_points: usize,
    pub bars: Vec<Bar>,
}

/// GET /api/stocks/historical/:symbol?start=&end=
pub async fn get_historical(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(q): Query<HistoricalQuery>,
) -> ApiResult<HistoricalData> {
    let symbol = normalize_symbol(&symbol)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid symbol: {}", symbol)))?;
    let end = q.end.unwrap_or_else(|| Utc::now().date_naive());
    let start = q
        .start
        .unwrap_or_else(|| end - Duration::days(DEFAULT_LOOKBACK_DAYS));
    if start > end {
        return Err(ApiError::BadRequest("start must not be after end".to_string()));
    }

    let series = state
        .prices
        .daily_bars(&symbol, start, end)
        .await
        .map_err(|e| {
            tracing::warn!(symbol = %symbol, "Historical data fetch failed: {:#}", e);
            ApiError::Upstream(format!("Failed to fetch historical data for {}", symbol))
        })?;

    if series.is_empty() {
        return Err(ApiError::NotFound(format!(
            "No historical data found for {}",
            symbol
        )));
    }

    Ok(ok(HistoricalData {
        symbol,
        start,
        end,
        data_points: series.len(),
        bars: series.bars,
    }))
}
