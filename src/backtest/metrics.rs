//! Equity-curve backtest metrics
//!
//! Replays a per-bar action sequence against closing prices with an
//! all-in/all-out long-only position and derives P&L, win rate, drawdown and
//! an annualized Sharpe ratio.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Trading days per year used to annualize the Sharpe ratio.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Per-bar trading decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", from = "i8")]
pub enum Action {
    Sell,
    Hold,
    Buy,
}

impl Action {
    pub fn as_signal(self) -> i8 {
        match self {
            Action::Sell => -1,
            Action::Hold => 0,
            Action::Buy => 1,
        }
    }
}

impl From<i8> for Action {
    fn from(v: i8) -> Self {
        match v {
            v if v < 0 => Action::Sell,
            0 => Action::Hold,
            _ => Action::Buy,
        }
    }
}

impl From<Action> for i8 {
    fn from(a: Action) -> Self {
        a.as_signal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestMetrics {
    pub final_value: f64,
    pub total_return: f64,
    pub total_return_percent: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percent of closed trades that exited above entry. 0 when there were no trades.
    pub win_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharpe_ratio: Option<f64>,
    /// (max value - min value) / max value, in percent.
    pub max_drawdown: f64,
}

/// A round trip closed by a sell or by the final liquidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: u64,
    pub pnl: f64,
    pub forced: bool,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.exit_price > self.entry_price
    }
}

/// Full replay output: metrics plus the trade log and per-bar equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Simulation {
    pub metrics: BacktestMetrics,
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<f64>,
}

struct OpenPosition {
    shares: u64,
    entry_price: f64,
    entry_index: usize,
}

struct Ledger {
    cash: f64,
    position: Option<OpenPosition>,
    trades: Vec<ClosedTrade>,
}

impl Ledger {
    fn new(cash: f64) -> Self {
        Self {
            cash,
            position: None,
            trades: Vec::new(),
        }
    }

    fn shares(&self) -> u64 {
        self.position.as_ref().map_or(0, |p| p.shares)
    }

    fn value_at(&self, price: f64) -> f64 {
        self.cash + self.shares() as f64 * price
    }

    fn buy(&mut self, index: usize, price: f64) {
        if self.position.is_some() || !(price.is_finite() && price > 0.0) {
            return;
        }
        let shares = (self.cash / price).floor();
        if shares < 1.0 {
            return;
        }
        let shares = shares as u64;
        self.cash -= shares as f64 * price;
        self.position = Some(OpenPosition {
            shares,
            entry_price: price,
            entry_index: index,
        });
    }

    fn sell(&mut self, index: usize, price: f64, forced: bool) {
        let Some(pos) = self.position.take() else {
            return;
        };
        self.cash += pos.shares as f64 * price;
        self.trades.push(ClosedTrade {
            entry_index: pos.entry_index,
            exit_index: index,
            entry_price: pos.entry_price,
            exit_price: price,
            shares: pos.shares,
            pnl: (price - pos.entry_price) * pos.shares as f64,
            forced,
        });
    }
}

/// Replay `actions` against `closes`. Only the common prefix of the two slices is used.
pub fn simulate(actions: &[Action], closes: &[f64], initial_capital: f64) -> Simulation {
    let steps = actions.len().min(closes.len());
    let mut ledger = Ledger::new(initial_capital);
    let mut max_value = initial_capital;
    let mut min_value = initial_capital;
    let mut returns = Vec::with_capacity(steps.saturating_sub(1));
    let mut equity_curve = Vec::with_capacity(steps);

    for i in 0..steps {
        let price = closes[i];

        match actions[i] {
            Action::Buy if ledger.position.is_none() => ledger.buy(i, price),
            Action::Sell if ledger.position.is_some() => ledger.sell(i, price, false),
            _ => {}
        }

        let value = ledger.value_at(price);
        max_value = max_value.max(value);
        min_value = min_value.min(value);
        equity_curve.push(value);

        if i > 0 {
            // Post-action holdings revalued at the previous close.
            let prev_value = ledger.value_at(closes[i - 1]);
            if prev_value.abs() > f64::EPSILON {
                returns.push((value - prev_value) / prev_value);
            }
        }
    }

    if steps > 0 && ledger.position.is_some() {
        ledger.sell(steps - 1, closes[steps - 1], true);
    }

    let final_value = ledger.cash;
    let total_return = final_value - initial_capital;
    let total_return_percent = if initial_capital.abs() > f64::EPSILON {
        total_return / initial_capital * 100.0
    } else {
        0.0
    };

    let total_trades = ledger.trades.len();
    let winning_trades = ledger.trades.iter().filter(|t| t.is_win()).count();
    let losing_trades = total_trades - winning_trades;
    let win_rate = if total_trades > 0 {
        winning_trades as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };

    let max_drawdown = if max_value > 0.0 {
        (max_value - min_value) / max_value * 100.0
    } else {
        0.0
    };

    let metrics = BacktestMetrics {
        final_value,
        total_return,
        total_return_percent,
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        sharpe_ratio: calculate_sharpe(&returns),
        max_drawdown,
    };

    Simulation {
        metrics,
        trades: ledger.trades,
        equity_curve,
    }
}

/// Metrics for an action sequence. Total: never panics and never yields NaN Sharpe.
pub fn calculate_metrics(actions: &[Action], closes: &[f64], initial_capital: f64) -> BacktestMetrics {
    simulate(actions, closes, initial_capital).metrics
}

/// Like [`calculate_metrics`] but rejects inputs that cannot describe a real account.
pub fn try_calculate_metrics(
    actions: &[Action],
    closes: &[f64],
    initial_capital: f64,
) -> Result<BacktestMetrics> {
    ensure!(
        initial_capital.is_finite() && initial_capital > 0.0,
        "initial capital must be positive, got {}",
        initial_capital
    );
    ensure!(
        actions.len() == closes.len(),
        "actions ({}) and closing prices ({}) differ in length",
        actions.len(),
        closes.len()
    );
    if let Some((i, p)) = closes
        .iter()
        .enumerate()
        .find(|(_, p)| !(p.is_finite() && **p > 0.0))
    {
        anyhow::bail!("closing price at index {} is not a positive number: {}", i, p);
    }
    Ok(calculate_metrics(actions, closes, initial_capital))
}

/// Annualized Sharpe over per-bar returns (population variance).
/// `None` without samples or when returns do not vary.
fn calculate_sharpe(returns: &[f64]) -> Option<f64> {
    if returns.is_empty() {
        return None;
    }

    let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| (r - mean_return).powi(2))
        .sum::<f64>()
        / returns.len() as f64;

    let std_dev = variance.sqrt();
    if std_dev > f64::EPSILON && std_dev.is_finite() {
        Some(mean_return / std_dev * TRADING_DAYS_PER_YEAR.sqrt())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acts(v: &[i8]) -> Vec<Action> {
        v.iter().copied().map(Action::from).collect()
    }

    #[test]
    fn test_action_from_signal() {
        assert_eq!(Action::from(-3), Action::Sell);
        assert_eq!(Action::from(0), Action::Hold);
        assert_eq!(Action::from(7), Action::Buy);
        assert_eq!(serde_json::to_string(&Action::Sell).unwrap(), "-1");
        let parsed: Vec<Action> = serde_json::from_str("[1,0,-1]").unwrap();
        assert_eq!(parsed, vec![Action::Buy, Action::Hold, Action::Sell]);
    }

    #[test]
    fn test_empty_input() {
        let m = calculate_metrics(&[], &[], 10_000.0);
        assert_eq!(m.final_value, 10_000.0);
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.win_rate, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
        assert!(m.sharpe_ratio.is_none());
    }

    #[test]
    fn test_single_winning_round_trip() {
        // Buy 100 shares at 10, sell at 12.
        let m = calculate_metrics(&acts(&[1, 0, -1]), &[10.0, 11.0, 12.0], 1_000.0);
        assert_eq!(m.final_value, 1_200.0);
        assert_eq!(m.total_return, 200.0);
        assert!((m.total_return_percent - 20.0).abs() < 1e-9);
        assert_eq!(m.total_trades, 1);
        assert_eq!(m.winning_trades, 1);
        assert_eq!(m.losing_trades, 0);
        assert_eq!(m.win_rate, 100.0);
    }

    #[test]
    fn test_losing_trade_and_drawdown() {
        let m = calculate_metrics(&acts(&[1, -1]), &[10.0, 8.0], 1_000.0);
        assert_eq!(m.final_value, 800.0);
        assert_eq!(m.losing_trades, 1);
        assert_eq!(m.win_rate, 0.0);
        assert!((m.max_drawdown - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_break_even_exit_counts_as_loss() {
        let m = calculate_metrics(&acts(&[1, -1]), &[10.0, 10.0], 1_000.0);
        assert_eq!(m.total_trades, 1);
        assert_eq!(m.winning_trades + m.losing_trades, m.total_trades);
        assert_eq!(m.losing_trades, 1);
    }

    #[test]
    fn test_open_position_force_closed_at_last_price() {
        let sim = simulate(&acts(&[1, 0, 0]), &[10.0, 11.0, 13.0], 105.0);
        // 10 shares at 10, 5 cash left over.
        assert_eq!(sim.metrics.final_value, 135.0);
        assert_eq!(sim.metrics.total_trades, 1);
        assert_eq!(sim.trades.len(), 1);
        assert!(sim.trades[0].forced);
        assert_eq!(sim.trades[0].shares, 10);
        assert_eq!(sim.equity_curve, vec![105.0, 115.0, 135.0]);
    }

    #[test]
    fn test_buy_ignored_when_cash_below_price() {
        let m = calculate_metrics(&acts(&[1, -1]), &[500.0, 600.0], 100.0);
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.final_value, 100.0);
    }

    #[test]
    fn test_repeated_signals_do_not_pyramid() {
        let sim = simulate(&acts(&[1, 1, -1, -1]), &[10.0, 5.0, 10.0, 20.0], 100.0);
        assert_eq!(sim.trades.len(), 1);
        assert_eq!(sim.trades[0].shares, 10);
        assert_eq!(sim.metrics.final_value, 100.0);
    }

    #[test]
    fn test_sharpe_undefined_for_flat_returns() {
        // Never invested: every daily return is zero.
        let m = calculate_metrics(&acts(&[0, 0, 0, 0]), &[10.0, 11.0, 9.0, 12.0], 1_000.0);
        assert!(m.sharpe_ratio.is_none());
    }

    #[test]
    fn test_sharpe_defined_for_varying_returns() {
        let m = calculate_metrics(
            &acts(&[1, 0, 0, 0, 0]),
            &[10.0, 11.0, 10.5, 12.0, 12.5],
            1_000.0,
        );
        let sharpe = m.sharpe_ratio.expect("sharpe should be defined");
        assert!(sharpe.is_finite());
        assert!(sharpe > 0.0);
    }

    #[test]
    fn test_sharpe_uses_population_variance() {
        let returns = [0.01, -0.01, 0.02, 0.0];
        let mean = 0.005;
        let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / 4.0;
        let expected = mean / var.sqrt() * 252.0_f64.sqrt();
        let got = calculate_sharpe(&returns).unwrap();
        assert!((got - expected).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_lengths_use_common_prefix() {
        let m = calculate_metrics(&acts(&[1, -1, 1]), &[10.0, 12.0], 100.0);
        assert_eq!(m.total_trades, 1);
        assert_eq!(m.final_value, 120.0);
    }

    #[test]
    fn test_try_calculate_rejects_bad_input() {
        assert!(try_calculate_metrics(&acts(&[1]), &[10.0], 0.0).is_err());
        assert!(try_calculate_metrics(&acts(&[1, 0]), &[10.0], 100.0).is_err());
        assert!(try_calculate_metrics(&acts(&[1, 0]), &[10.0, -1.0], 100.0).is_err());
        assert!(try_calculate_metrics(&acts(&[1, 0]), &[10.0, 11.0], 100.0).is_ok());
    }
}
