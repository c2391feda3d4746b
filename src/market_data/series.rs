//! Daily OHLCV series.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use ta::{Close, High, Low, Open, Volume};

/// One daily bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|p| p.is_finite() && *p > 0.0)
            && self.volume.is_finite()
            && self.volume >= 0.0
    }
}

impl Open for Bar {
    fn open(&self) -> f64 {
        self.open
    }
}

impl High for Bar {
    fn high(&self) -> f64 {
        self.high
    }
}

impl Low for Bar {
    fn low(&self) -> f64 {
        self.low
    }
}

impl Close for Bar {
    fn close(&self) -> f64 {
        self.close
    }
}

impl Volume for Bar {
    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Time-ordered bars for a single symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build a series, sorting by date and dropping duplicate dates and
    /// bars with non-positive or non-finite prices.
    pub fn new(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Self {
        bars.retain(Bar::is_valid);
        bars.sort_by(|a, b| a.date.cmp(&b.date));
        bars.dedup_by(|a, b| a.date == b.date);
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    /// Series where open/high/low all equal the close. Handy when only closes are known.
    pub fn from_closes(symbol: impl Into<String>, start: NaiveDate, closes: &[f64]) -> Self {
        let bars = closes
            .iter()
            .enumerate()
            .filter_map(|(i, &close)| {
                let date = start.checked_add_days(chrono::Days::new(i as u64))?;
                Some(Bar {
                    date,
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 0.0,
                })
            })
            .collect();
        Self::new(symbol, bars)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn opens(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.open).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// Parse `date,open,high,low,close,volume` rows. A header row is skipped
    /// when its first column is not a date.
    pub fn from_csv<R: BufRead>(symbol: impl Into<String>, reader: R) -> Result<Self> {
        let mut bars = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read line {}", idx + 1))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let cols: Vec<&str> = line.split(',').map(str::trim).collect();
            if cols.len() < 6 {
                bail!("line {}: expected 6 columns, found {}", idx + 1, cols.len());
            }

            let date = match NaiveDate::parse_from_str(cols[0], "%Y-%m-%d") {
                Ok(d) => d,
                Err(_) if idx == 0 => continue,
                Err(e) => bail!("line {}: invalid date {:?}: {}", idx + 1, cols[0], e),
            };

            let num = |i: usize, name: &str| -> Result<f64> {
                cols[i]
                    .parse::<f64>()
                    .with_context(|| format!("line {}: invalid {} {:?}", idx + 1, name, cols[i]))
            };

            bars.push(Bar {
                date,
                open: num(1, "open")?,
                high: num(2, "high")?,
                low: num(3, "low")?,
                close: num(4, "close")?,
                volume: num(5, "volume")?,
            });
        }

        Ok(Self::new(symbol, bars))
    }
}
