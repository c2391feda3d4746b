//! Technical backtest routes.

use axum::{extract::State, Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::envelope::{ok, ApiError, ApiResult};
use super::AppState;
use crate::backtest::{
    run_technical_backtest, select_strategies, StrategyInfo, StrategyResult, TechnicalStrategy,
};
use crate::market_data::normalize_symbol;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub initial_capital: Option<f64>,
    #[serde(default)]
    pub strategy_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub results: Vec<StrategyResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignored_strategy_ids: Vec<String>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .map_err(|_| ApiError::BadRequest(format!("Invalid {}: {}", field, raw)))
}

/// POST /api/backtest/technical
pub async fn post_technical_backtest(
    State(state): State<AppState>,
    Json(req): Json<BacktestRequest>,
) -> ApiResult<BacktestReport> {
    let (Some(symbol), Some(start_raw), Some(end_raw)) = (
        non_empty(&req.symbol),
        non_empty(&req.start_date),
        non_empty(&req.end_date),
    ) else {
        return Err(ApiError::BadRequest(
            "Missing required parameters: symbol, startDate, endDate".to_string(),
        ));
    };
    let symbol = normalize_symbol(symbol)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid symbol: {}", symbol)))?;
    let start = parse_date("startDate", start_raw)?;
    let end = parse_date("endDate", end_raw)?;
    if start > end {
        return Err(ApiError::BadRequest(
            "startDate must not be after endDate".to_string(),
        ));
    }

    let initial_capital = req
        .initial_capital
        .unwrap_or(state.config.default_initial_capital);
    if !initial_capital.is_finite() || initial_capital <= 0.0 {
        return Err(ApiError::BadRequest(
            "initialCapital must be positive".to_string(),
        ));
    }

    let selection = select_strategies(&req.strategy_ids);
    if !selection.ignored_ids.is_empty() {
        warn!(symbol = %symbol, ignored = ?selection.ignored_ids, "Unknown strategy ids ignored");
    }

    let failed = || ApiError::Upstream(format!("Failed to fetch historical data for {}", symbol));
    let series = match state.prices.daily_bars(&symbol, start, end).await {
        Ok(series) if !series.is_empty() => series,
        Ok(_) => return Err(failed()),
        Err(e) => {
            warn!(symbol = %symbol, "Historical data fetch failed: {:#}", e);
            return Err(failed());
        }
    };

    info!(
        symbol = %symbol,
        bars = series.len(),
        strategies = selection.strategies.len(),
        "📈 Running technical backtest"
    );

    let results = run_technical_backtest(&series, &selection.strategies, initial_capital)?;

    Ok(ok(BacktestReport {
        symbol,
        start_date: start,
        end_date: end,
        initial_capital,
        results,
        ignored_strategy_ids: selection.ignored_ids,
    }))
}

/// GET /api/backtest/strategies
pub async fn get_strategies() -> ApiResult<Vec<StrategyInfo>> {
    Ok(ok(TechnicalStrategy::ALL
        .iter()
        .copied()
        .map(StrategyInfo::from)
        .collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(
            parse_date("startDate", "2024-01-02").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
        assert_eq!(
            parse_date("startDate", "2024-01-02T15:00:00Z").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
        assert!(parse_date("startDate", "yesterday").is_err());
    }

    #[test]
    fn test_request_defaults() {
        let req: BacktestRequest =
            serde_json::from_str(r#"{"symbol":"AAPL","startDate":"2024-01-01","endDate":"2024-06-01"}"#)
                .unwrap();
        assert!(req.initial_capital.is_none());
        assert!(req.strategy_ids.is_empty());
    }
}
