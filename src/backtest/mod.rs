//! Backtesting
//! Technical strategies replayed over daily closes with equity-curve metrics.

pub mod indicators;
pub mod metrics;
pub mod runner;
pub mod strategies;

pub use metrics::{calculate_metrics, simulate, try_calculate_metrics, Action, BacktestMetrics, ClosedTrade, Simulation};
pub use runner::{run_technical_backtest, StrategyResult};
pub use strategies::{select_strategies, StrategyInfo, StrategySelection, TechnicalStrategy};

/// Starting cash when a request does not name one.
pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;
