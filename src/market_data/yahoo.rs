//! Yahoo Finance chart API client (daily bars).

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Bar, PriceSeries, PriceSource};

pub const DEFAULT_YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Fetches daily bars from `/v8/finance/chart/{symbol}`.
#[derive(Clone)]
pub struct YahooChartClient {
    http: reqwest::Client,
    base_url: String,
}

impl YahooChartClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{base}/v8/finance/chart/{symbol}` with the symbol percent-encoded as
    /// a single path segment.
    fn chart_url(&self, symbol: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("invalid yahoo base url {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("yahoo base url cannot hold a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        Ok(url)
    }
}

#[async_trait]
impl PriceSource for YahooChartClient {
    async fn daily_bars(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceSeries> {
        if end < start {
            bail!("end date {} is before start date {}", end, start);
        }

        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .context("invalid start date")?;
        // period2 is exclusive upstream; push it one day out so `end` is included.
        let period2 = end
            .checked_add_days(Days::new(1))
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp())
            .context("invalid end date")?;

        let url = self.chart_url(symbol)?;
        let response = self
            .http
            .get(url)
            .header(reqwest::header::USER_AGENT, "tradedesk/1.0")
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "history".to_string()),
            ])
            .send()
            .await
            .context("yahoo chart request failed")?;

        let status = response.status();
        let body = response.text().await.context("yahoo chart text")?;
        debug!(symbol = %symbol, status = %status, body_len = body.len(), "yahoo chart response received");

        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            bail!("yahoo chart returned {} for {}", status, symbol);
        }

        let envelope: ChartEnvelope = serde_json::from_str(&body)
            .map_err(|e| {
                warn!(symbol = %symbol, error = %e, body_preview = %body.chars().take(300).collect::<String>(), "yahoo JSON parse failed");
                e
            })
            .context("yahoo chart json parse")?;

        parse_chart(symbol, envelope)
    }
}

fn parse_chart(symbol: &str, envelope: ChartEnvelope) -> Result<PriceSeries> {
    if let Some(err) = envelope.chart.error {
        return Err(anyhow!(
            "yahoo chart error {}: {}",
            err.code.unwrap_or_default(),
            err.description.unwrap_or_default()
        ));
    }

    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(PriceSeries::new(symbol, Vec::new()));
    };

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let at = |v: &Vec<Option<f64>>, i: usize| v.get(i).copied().flatten();

    let bars = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let date = DateTime::from_timestamp(ts, 0)?.date_naive();
            Some(Bar {
                date,
                open: at(&quote.open, i)?,
                high: at(&quote.high, i)?,
                low: at(&quote.low, i)?,
                close: at(&quote.close, i)?,
                volume: at(&quote.volume, i).unwrap_or(0.0),
            })
        })
        .collect();

    Ok(PriceSeries::new(symbol, bars))
}
