//! Technical backtest runner: every selected strategy over one series, ranked.

use anyhow::{ensure, Result};
use serde::Serialize;
use tracing::{debug, info};

use super::metrics::{simulate, BacktestMetrics};
use super::strategies::TechnicalStrategy;
use crate::market_data::PriceSeries;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyResult {
    pub strategy_name: String,
    pub strategy_id: String,
    #[serde(flatten)]
    pub metrics: BacktestMetrics,
}

/// Run each strategy and sort the results by total return percent, best first.
pub fn run_technical_backtest(
    series: &PriceSeries,
    strategies: &[TechnicalStrategy],
    initial_capital: f64,
) -> Result<Vec<StrategyResult>> {
    ensure!(
        initial_capital.is_finite() && initial_capital > 0.0,
        "initial capital must be positive"
    );
    ensure!(!series.is_empty(), "no price data for {}", series.symbol);

    let closes = series.closes();
    let mut results = Vec::with_capacity(strategies.len());

    for strategy in strategies {
        let actions = strategy.actions(series)?;
        let sim = simulate(&actions, &closes, initial_capital);
        debug!(
            symbol = %series.symbol,
            strategy = strategy.id(),
            trades = sim.metrics.total_trades,
            return_pct = sim.metrics.total_return_percent,
            "strategy replayed"
        );
        results.push(StrategyResult {
            strategy_name: strategy.name().to_string(),
            strategy_id: strategy.id().to_string(),
            metrics: sim.metrics,
        });
    }

    results.sort_by(|a, b| {
        b.metrics
            .total_return_percent
            .partial_cmp(&a.metrics.total_return_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(best) = results.first() {
        info!(
            symbol = %series.symbol,
            bars = series.len(),
            strategies = results.len(),
            best = %best.strategy_id,
            best_return_pct = %format!("{:.2}", best.metrics.total_return_percent),
            "technical backtest complete"
        );
    }

    Ok(results)
}
