//! Property checks for the equity-curve metrics over seeded random walks.

use chrono::NaiveDate;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use tradedesk_backend::backtest::{
    calculate_metrics, run_technical_backtest, simulate, Action, TechnicalStrategy,
};
use tradedesk_backend::market_data::{Bar, PriceSeries};

const CASES: u64 = 200;

fn random_walk(rng: &mut ChaCha8Rng, len: usize) -> Vec<f64> {
    let mut price: f64 = rng.gen_range(5.0..500.0);
    (0..len)
        .map(|_| {
            price *= 1.0 + rng.gen_range(-0.05..0.05);
            price.max(0.01)
        })
        .collect()
}

fn random_actions(rng: &mut ChaCha8Rng, len: usize) -> Vec<Action> {
    (0..len)
        .map(|_| Action::from(rng.gen_range(-1i8..=1)))
        .collect()
}

fn random_series(rng: &mut ChaCha8Rng, len: usize) -> PriceSeries {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let closes = random_walk(rng, len);
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let spread = c * rng.gen_range(0.0..0.03);
            Bar {
                date: start + chrono::Duration::days(i as i64),
                open: c,
                high: c + spread,
                low: (c - spread).max(0.005),
                close: c,
                volume: rng.gen_range(1_000.0..1_000_000.0),
            }
        })
        .collect();
    PriceSeries::new("RND", bars)
}

#[test]
fn test_trade_counts_partition() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..CASES {
        let len = rng.gen_range(0..120);
        let closes = random_walk(&mut rng, len);
        let actions = random_actions(&mut rng, len);
        let m = calculate_metrics(&actions, &closes, 10_000.0);

        assert_eq!(m.total_trades, m.winning_trades + m.losing_trades);
        if m.total_trades == 0 {
            assert_eq!(m.win_rate, 0.0);
        } else {
            assert!((0.0..=100.0).contains(&m.win_rate));
        }
    }
}

#[test]
fn test_final_value_is_capital_plus_realized_pnl() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..CASES {
        let len = rng.gen_range(1..120);
        let closes = random_walk(&mut rng, len);
        let actions = random_actions(&mut rng, len);
        let capital = rng.gen_range(100.0..1_000_000.0);
        let sim = simulate(&actions, &closes, capital);

        let realized: f64 = sim.trades.iter().map(|t| t.pnl).sum();
        let expected = capital + realized;
        assert!(
            (sim.metrics.final_value - expected).abs() <= 1e-6 * expected.abs().max(1.0),
            "final {} vs expected {}",
            sim.metrics.final_value,
            expected
        );
        // Liquidated at the end: equity equals cash.
        if let Some(last) = sim.equity_curve.last() {
            assert!((last - sim.metrics.final_value).abs() <= 1e-6 * last.abs().max(1.0));
        }
    }
}

#[test]
fn test_drawdown_and_sharpe_are_well_formed() {
    let mut rng = ChaCha8Rng::seed_from_u64(23);
    for _ in 0..CASES {
        let len = rng.gen_range(0..120);
        let closes = random_walk(&mut rng, len);
        let actions = random_actions(&mut rng, len);
        let m = calculate_metrics(&actions, &closes, 50_000.0);

        assert!(m.max_drawdown >= 0.0);
        assert!(m.max_drawdown <= 100.0);
        if let Some(s) = m.sharpe_ratio {
            assert!(s.is_finite());
        }
    }
}

#[test]
fn test_buy_and_hold_tracks_price_change() {
    let mut rng = ChaCha8Rng::seed_from_u64(31);
    for _ in 0..CASES {
        let len = rng.gen_range(2..150);
        let closes = random_walk(&mut rng, len);
        let capital = rng.gen_range(1_000.0..100_000.0);
        let actions = vec![Action::Buy; len];
        let m = calculate_metrics(&actions, &closes, capital);

        let first = closes[0];
        let last = closes[len - 1];
        let shares = (capital / first).floor();
        let expected = capital + shares * (last - first);
        assert!((m.final_value - expected).abs() <= 1e-6 * expected.abs().max(1.0));
        assert_eq!(m.total_trades, if shares >= 1.0 { 1 } else { 0 });
    }
}

#[test]
fn test_every_strategy_survives_random_series() {
    let mut rng = ChaCha8Rng::seed_from_u64(43);
    for _ in 0..20 {
        let len = rng.gen_range(1..200);
        let series = random_series(&mut rng, len);
        let results = run_technical_backtest(&series, &TechnicalStrategy::ALL, 100_000.0).unwrap();
        assert_eq!(results.len(), TechnicalStrategy::ALL.len());
        for pair in results.windows(2) {
            assert!(pair[0].metrics.total_return_percent >= pair[1].metrics.total_return_percent);
        }
        for r in &results {
            assert!(r.metrics.final_value.is_finite());
            assert_eq!(
                r.metrics.total_trades,
                r.metrics.winning_trades + r.metrics.losing_trades
            );
        }
    }
}
