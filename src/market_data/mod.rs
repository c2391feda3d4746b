//! Market Data
//! Historical daily bars for backtests and charting.

pub mod series;
pub mod yahoo;

pub use series::{Bar, PriceSeries};
pub use yahoo::YahooChartClient;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Longest accepted ticker, e.g. `BRK-B` or `^GSPC` fit comfortably.
const MAX_SYMBOL_LEN: usize = 15;

/// Trims and upper-cases a ticker. `None` when it is empty, too long, or
/// holds anything but ASCII alphanumerics and `.`, `-`, `^`, `=`.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim();
    let valid = !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    valid.then(|| symbol.to_ascii_uppercase())
}

/// Anything that can produce daily bars for a symbol over an inclusive date range.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn daily_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries>;
}
