//! Technical Backtest CLI
//!
//! Runs the technical strategy suite over daily bars from a CSV file or the
//! Yahoo chart API and prints the ranked results.
//!
//! Usage:
//!   cargo run --bin backtest_cli -- --symbol AAPL --csv bars.csv
//!   cargo run --bin backtest_cli -- --symbol AAPL --start 2024-01-01 --end 2024-06-30 --json

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use tradedesk_backend::backtest::{
    run_technical_backtest, select_strategies, StrategyResult, DEFAULT_INITIAL_CAPITAL,
};
use tradedesk_backend::market_data::yahoo::DEFAULT_YAHOO_BASE_URL;
use tradedesk_backend::market_data::{PriceSeries, PriceSource, YahooChartClient};

#[derive(Parser, Debug)]
#[command(name = "backtest_cli")]
#[command(about = "Run technical strategy backtests over daily bars")]
struct Args {
    /// Ticker symbol
    #[arg(long)]
    symbol: String,

    /// CSV of daily bars (date,open,high,low,close,volume); skips the network
    #[arg(long)]
    csv: Option<PathBuf>,

    /// First date (YYYY-MM-DD), required without --csv
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last date (YYYY-MM-DD), required without --csv
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Starting cash
    #[arg(long, default_value_t = DEFAULT_INITIAL_CAPITAL)]
    capital: f64,

    /// Strategy ids to run (repeatable); all when omitted
    #[arg(long = "strategy")]
    strategies: Vec<String>,

    /// Yahoo chart API base URL
    #[arg(long, env = "YAHOO_BASE_URL", default_value = DEFAULT_YAHOO_BASE_URL)]
    yahoo_base_url: String,

    /// Print JSON instead of a table
    #[arg(long, default_value = "false")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tradedesk_backend::init_tracing("tradedesk_backend=info");
    let args = Args::parse();
    let symbol = args.symbol.trim().to_uppercase();

    let series = match &args.csv {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            PriceSeries::from_csv(&symbol, BufReader::new(file))?
        }
        None => {
            let (Some(start), Some(end)) = (args.start, args.end) else {
                bail!("--start and --end are required when --csv is not given");
            };
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("Failed to build HTTP client")?;
            YahooChartClient::new(http, args.yahoo_base_url.clone())
                .daily_bars(&symbol, start, end)
                .await?
        }
    };

    if series.is_empty() {
        bail!("No price data for {}", symbol);
    }

    let selection = select_strategies(&args.strategies);
    for id in &selection.ignored_ids {
        eprintln!("warning: unknown strategy id {:?} ignored", id);
    }
    if selection.strategies.is_empty() {
        bail!("No known strategies selected");
    }

    let results = run_technical_backtest(&series, &selection.strategies, args.capital)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_table(&series, args.capital, &results);
    }

    Ok(())
}

fn print_table(series: &PriceSeries, capital: f64, results: &[StrategyResult]) {
    let range = match (series.first_date(), series.last_date()) {
        (Some(a), Some(b)) => format!("{} .. {}", a, b),
        _ => "-".to_string(),
    };
    println!(
        "=== {} | {} bars | {} | capital ${:.2} ===",
        series.symbol,
        series.len(),
        range,
        capital
    );
    println!(
        "{:<34} {:>14} {:>9} {:>7} {:>8} {:>8} {:>8}",
        "Strategy", "Final value", "Return%", "Trades", "Win%", "Sharpe", "MaxDD%"
    );
    for r in results {
        let m = &r.metrics;
        let sharpe = m
            .sharpe_ratio
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<34} {:>14.2} {:>9.2} {:>7} {:>8.1} {:>8} {:>8.2}",
            r.strategy_name,
            m.final_value,
            m.total_return_percent,
            m.total_trades,
            m.win_rate,
            sharpe,
            m.max_drawdown
        );
    }
}
