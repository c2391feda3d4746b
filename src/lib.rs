//! TradeDesk Backend Library
//!
//! Technical backtesting, research consensus jobs and paper-trading
//! portfolios behind a JSON API. Binaries and integration tests build on the
//! modules exported here.

pub mod api;
pub mod backtest;
pub mod config;
pub mod market_data;
pub mod middleware;
pub mod portfolio;
pub mod research;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with `RUST_LOG`, falling back to `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
