//! Technical indicators over whole series.
//!
//! Every function returns one value per input element. Indicators the `ta`
//! crate provides are streamed through it; the rest are computed here over
//! trailing windows (shorter windows during warm-up).

use anyhow::{anyhow, ensure, Result};
use ta::errors::TaError;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, Maximum, Minimum, MoneyFlowIndex,
    MovingAverageConvergenceDivergence, RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::Next;

use crate::market_data::Bar;

fn indicator_err(e: TaError) -> anyhow::Error {
    anyhow!("invalid indicator parameter: {:?}", e)
}

pub fn sma(values: &[f64], period: usize) -> Result<Vec<f64>> {
    let mut ind = SimpleMovingAverage::new(period).map_err(indicator_err)?;
    Ok(values.iter().map(|&v| ind.next(v)).collect())
}

pub fn ema(values: &[f64], period: usize) -> Result<Vec<f64>> {
    let mut ind = ExponentialMovingAverage::new(period).map_err(indicator_err)?;
    Ok(values.iter().map(|&v| ind.next(v)).collect())
}

pub fn rsi(values: &[f64], period: usize) -> Result<Vec<f64>> {
    let mut ind = RelativeStrengthIndex::new(period).map_err(indicator_err)?;
    Ok(values.iter().map(|&v| ind.next(v)).collect())
}

pub fn rolling_max(values: &[f64], period: usize) -> Result<Vec<f64>> {
    let mut ind = Maximum::new(period).map_err(indicator_err)?;
    Ok(values.iter().map(|&v| ind.next(v)).collect())
}

pub fn rolling_min(values: &[f64], period: usize) -> Result<Vec<f64>> {
    let mut ind = Minimum::new(period).map_err(indicator_err)?;
    Ok(values.iter().map(|&v| ind.next(v)).collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Result<Vec<MacdPoint>> {
    let mut ind = MovingAverageConvergenceDivergence::new(fast, slow, signal).map_err(indicator_err)?;
    Ok(values
        .iter()
        .map(|&v| {
            let out = ind.next(v);
            MacdPoint {
                macd: out.macd,
                signal: out.signal,
                histogram: out.histogram,
            }
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn bollinger(values: &[f64], period: usize, multiplier: f64) -> Result<Vec<Band>> {
    let mut ind = BollingerBands::new(period, multiplier).map_err(indicator_err)?;
    Ok(values
        .iter()
        .map(|&v| {
            let out = ind.next(v);
            Band {
                upper: out.upper,
                middle: out.average,
                lower: out.lower,
            }
        })
        .collect())
}

/// Williams %R in [-100, 0]. -50 when the window has no range.
pub fn williams_r(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Result<Vec<f64>> {
    ensure_aligned(&[highs, lows, closes])?;
    let hh = rolling_max(highs, period)?;
    let ll = rolling_min(lows, period)?;
    Ok(closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let range = hh[i] - ll[i];
            if range > f64::EPSILON {
                (hh[i] - c) / range * -100.0
            } else {
                -50.0
            }
        })
        .collect())
}

/// Stochastic %K (raw) and %D (SMA of %K), both in [0, 100].
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    signal_period: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    ensure_aligned(&[highs, lows, closes])?;
    let hh = rolling_max(highs, period)?;
    let ll = rolling_min(lows, period)?;
    let k: Vec<f64> = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let range = hh[i] - ll[i];
            if range > f64::EPSILON {
                (c - ll[i]) / range * 100.0
            } else {
                50.0
            }
        })
        .collect();
    let d = sma(&k, signal_period)?;
    Ok((k, d))
}

/// SMA(5) - SMA(34) of the median price.
pub fn awesome_oscillator(highs: &[f64], lows: &[f64]) -> Result<Vec<f64>> {
    ensure_aligned(&[highs, lows])?;
    let median: Vec<f64> = highs.iter().zip(lows).map(|(h, l)| (h + l) / 2.0).collect();
    let fast = sma(&median, 5)?;
    let slow = sma(&median, 34)?;
    Ok(fast.iter().zip(&slow).map(|(f, s)| f - s).collect())
}

/// EMA(fast) - EMA(slow).
pub fn absolute_price_oscillator(values: &[f64], fast: usize, slow: usize) -> Result<Vec<f64>> {
    let f = ema(values, fast)?;
    let s = ema(values, slow)?;
    Ok(f.iter().zip(&s).map(|(a, b)| a - b).collect())
}

/// Aroon up/down in [0, 100] over `period` bars.
pub fn aroon(highs: &[f64], lows: &[f64], period: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    ensure_aligned(&[highs, lows])?;
    ensure!(period > 0, "aroon period must be positive");

    let mut up = Vec::with_capacity(highs.len());
    let mut down = Vec::with_capacity(lows.len());
    for i in 0..highs.len() {
        let start = i.saturating_sub(period);
        let mut hi_idx = start;
        let mut lo_idx = start;
        for j in start..=i {
            // Ties go to the most recent bar.
            if highs[j] >= highs[hi_idx] {
                hi_idx = j;
            }
            if lows[j] <= lows[lo_idx] {
                lo_idx = j;
            }
        }
        let p = period as f64;
        up.push((p - (i - hi_idx) as f64) / p * 100.0);
        down.push((p - (i - lo_idx) as f64) / p * 100.0);
    }
    Ok((up, down))
}

/// Rolling volume-weighted average price. Falls back to the close when the
/// window traded no volume.
pub fn vwap(closes: &[f64], volumes: &[f64], period: usize) -> Result<Vec<f64>> {
    ensure_aligned(&[closes, volumes])?;
    ensure!(period > 0, "vwap period must be positive");

    let mut pv_sum = 0.0;
    let mut v_sum = 0.0;
    let mut out = Vec::with_capacity(closes.len());
    for i in 0..closes.len() {
        pv_sum += closes[i] * volumes[i];
        v_sum += volumes[i];
        if i >= period {
            pv_sum -= closes[i - period] * volumes[i - period];
            v_sum -= volumes[i - period];
        }
        out.push(if v_sum > f64::EPSILON {
            pv_sum / v_sum
        } else {
            closes[i]
        });
    }
    Ok(out)
}

/// Least-squares `(slope, intercept)` of `window` against its index.
fn linear_fit(window: &[f64]) -> Option<(f64, f64)> {
    if window.len() < 2 {
        return None;
    }
    let n = window.len() as f64;
    let sum_x: f64 = (0..window.len()).map(|x| x as f64).sum();
    let sum_y: f64 = window.iter().sum();
    let sum_xy: f64 = window.iter().enumerate().map(|(x, y)| x as f64 * y).sum();
    let sum_xx: f64 = (0..window.len()).map(|x| (x * x) as f64).sum();
    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    Some((slope, (sum_y - slope * sum_x) / n))
}

/// Trailing window ending at `i`, at most `period` long.
fn window(values: &[f64], i: usize, period: usize) -> &[f64] {
    &values[(i + 1).saturating_sub(period)..=i]
}

/// Chande forecast oscillator: percent distance of the close from the
/// least-squares line fitted over the trailing window, evaluated at the last bar.
pub fn chande_forecast(values: &[f64], period: usize) -> Result<Vec<f64>> {
    ensure!(period > 0, "cfo period must be positive");

    Ok((0..values.len())
        .map(|i| {
            let w = window(values, i, period);
            let Some((slope, intercept)) = linear_fit(w) else {
                return 0.0;
            };
            let forecast = intercept + slope * (w.len() - 1) as f64;
            let close = values[i];
            if close.abs() > f64::EPSILON {
                (close - forecast) / close * 100.0
            } else {
                0.0
            }
        })
        .collect())
}

fn rolling_sum(values: &[f64], period: usize) -> Vec<f64> {
    let mut sum = 0.0;
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            sum += v;
            if i >= period {
                sum -= values[i - period];
            }
            sum
        })
        .collect()
}

/// `num / den`, or `fallback` when the denominator is (near) zero.
fn ratio_or(num: f64, den: f64, fallback: f64) -> f64 {
    if den.abs() > f64::EPSILON {
        num / den
    } else {
        fallback
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ichimoku {
    pub conversion: f64,
    pub base: f64,
    pub span_a: f64,
    pub span_b: f64,
}

/// Ichimoku lines (9/26/52) with the leading spans left undisplaced, so each
/// bar is compared against the cloud computed from its own history.
pub fn ichimoku(highs: &[f64], lows: &[f64]) -> Result<Vec<Ichimoku>> {
    ensure_aligned(&[highs, lows])?;
    let midpoint = |period: usize| -> Result<Vec<f64>> {
        let hh = rolling_max(highs, period)?;
        let ll = rolling_min(lows, period)?;
        Ok(hh.iter().zip(&ll).map(|(h, l)| (h + l) / 2.0).collect())
    };
    let conversion = midpoint(9)?;
    let base = midpoint(26)?;
    let span_b = midpoint(52)?;

    Ok((0..highs.len())
        .map(|i| Ichimoku {
            conversion: conversion[i],
            base: base[i],
            span_a: (conversion[i] + base[i]) / 2.0,
            span_b: span_b[i],
        })
        .collect())
}

/// (close - open) / (high - low); 0 on bars with no range.
pub fn balance_of_power(opens: &[f64], highs: &[f64], lows: &[f64], closes: &[f64]) -> Result<Vec<f64>> {
    ensure_aligned(&[opens, highs, lows, closes])?;
    Ok((0..closes.len())
        .map(|i| ratio_or(closes[i] - opens[i], highs[i] - lows[i], 0.0))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kdj {
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

/// KDJ from the raw stochastic value. K and D start at 50 and are smoothed
/// with weight `1 / signal_period`; J = 3K - 2D.
pub fn kdj(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    signal_period: usize,
) -> Result<Vec<Kdj>> {
    ensure!(signal_period > 0, "kdj signal period must be positive");
    let (rsv, _) = stochastic(highs, lows, closes, period, signal_period)?;

    let weight = 1.0 / signal_period as f64;
    let (mut k, mut d) = (50.0, 50.0);
    Ok(rsv
        .into_iter()
        .map(|r| {
            k = weight * r + (1.0 - weight) * k;
            d = weight * k + (1.0 - weight) * d;
            Kdj {
                k,
                d,
                j: 3.0 * k - 2.0 * d,
            }
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SarPoint {
    pub sar: f64,
    pub rising: bool,
}

/// Wilder's parabolic stop-and-reverse. Starts in an uptrend with the stop
/// at the first low; the acceleration factor grows by `step` on each new
/// extreme, up to `max_step`.
pub fn parabolic_sar(highs: &[f64], lows: &[f64], step: f64, max_step: f64) -> Result<Vec<SarPoint>> {
    ensure_aligned(&[highs, lows])?;
    ensure!(
        step > 0.0 && max_step >= step,
        "psar needs 0 < step <= max step"
    );
    if highs.is_empty() {
        return Ok(Vec::new());
    }

    let mut rising = true;
    let mut sar = lows[0];
    let mut extreme = highs[0];
    let mut af = step;
    let mut out = Vec::with_capacity(highs.len());
    out.push(SarPoint { sar, rising });

    for i in 1..highs.len() {
        let mut next = sar + af * (extreme - sar);
        if rising {
            next = next.min(lows[i - 1]);
            if i >= 2 {
                next = next.min(lows[i - 2]);
            }
            if lows[i] < next {
                rising = false;
                next = extreme;
                extreme = lows[i];
                af = step;
            } else if highs[i] > extreme {
                extreme = highs[i];
                af = (af + step).min(max_step);
            }
        } else {
            next = next.max(highs[i - 1]);
            if i >= 2 {
                next = next.max(highs[i - 2]);
            }
            if highs[i] > next {
                rising = true;
                next = extreme;
                extreme = highs[i];
                af = step;
            } else if lows[i] < extreme {
                extreme = lows[i];
                af = (af + step).min(max_step);
            }
        }
        sar = next;
        out.push(SarPoint { sar, rising });
    }
    Ok(out)
}

/// Vortex +VI and -VI over `period` bars. Both read 0 until there is a
/// true range to divide by.
pub fn vortex(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    ensure_aligned(&[highs, lows, closes])?;
    ensure!(period > 0, "vortex period must be positive");

    let n = closes.len();
    let mut plus_vm = vec![0.0; n];
    let mut minus_vm = vec![0.0; n];
    let mut true_range = vec![0.0; n];
    for i in 1..n {
        plus_vm[i] = (highs[i] - lows[i - 1]).abs();
        minus_vm[i] = (lows[i] - highs[i - 1]).abs();
        true_range[i] = (highs[i] - lows[i])
            .max((highs[i] - closes[i - 1]).abs())
            .max((lows[i] - closes[i - 1]).abs());
    }

    let plus = rolling_sum(&plus_vm, period);
    let minus = rolling_sum(&minus_vm, period);
    let tr = rolling_sum(&true_range, period);
    Ok((
        plus.iter().zip(&tr).map(|(p, t)| ratio_or(*p, *t, 0.0)).collect(),
        minus.iter().zip(&tr).map(|(m, t)| ratio_or(*m, *t, 0.0)).collect(),
    ))
}

/// Price Headley's acceleration bands: SMAs of the range-widened highs and
/// lows around an SMA of the close.
pub fn acceleration_bands(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    factor: f64,
) -> Result<Vec<Band>> {
    ensure_aligned(&[highs, lows, closes])?;
    let width = |i: usize| ratio_or(highs[i] - lows[i], highs[i] + lows[i], 0.0) * factor;
    let widened_highs: Vec<f64> = (0..highs.len()).map(|i| highs[i] * (1.0 + width(i))).collect();
    let narrowed_lows: Vec<f64> = (0..lows.len()).map(|i| lows[i] * (1.0 - width(i))).collect();

    let upper = sma(&widened_highs, period)?;
    let middle = sma(closes, period)?;
    let lower = sma(&narrowed_lows, period)?;
    Ok((0..closes.len())
        .map(|i| Band {
            upper: upper[i],
            middle: middle[i],
            lower: lower[i],
        })
        .collect())
}

/// Projection oscillator and its EMA signal line, both nominally in [0, 100].
///
/// Highs and lows in the window are projected to the current bar along their
/// own regression slopes; the oscillator is where the close sits between the
/// highest projected high and the lowest projected low (50 with no range).
pub fn projection_oscillator(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    smooth: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    ensure_aligned(&[highs, lows, closes])?;
    ensure!(period > 0, "projection oscillator period must be positive");

    let po: Vec<f64> = (0..closes.len())
        .map(|i| {
            let wh = window(highs, i, period);
            let wl = window(lows, i, period);
            let high_slope = linear_fit(wh).map_or(0.0, |(m, _)| m);
            let low_slope = linear_fit(wl).map_or(0.0, |(m, _)| m);
            let last = wh.len() - 1;

            let upper = wh
                .iter()
                .enumerate()
                .map(|(k, h)| h + high_slope * (last - k) as f64)
                .fold(f64::NEG_INFINITY, f64::max);
            let lower = wl
                .iter()
                .enumerate()
                .map(|(k, l)| l + low_slope * (last - k) as f64)
                .fold(f64::INFINITY, f64::min);
            ratio_or(closes[i] - lower, upper - lower, 0.5) * 100.0
        })
        .collect();
    let signal = ema(&po, smooth)?;
    Ok((po, signal))
}

/// Chaikin money flow: volume-weighted close location over `period` bars.
/// 0 while the window traded no volume.
pub fn chaikin_money_flow(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    volumes: &[f64],
    period: usize,
) -> Result<Vec<f64>> {
    ensure_aligned(&[highs, lows, closes, volumes])?;
    ensure!(period > 0, "cmf period must be positive");

    let flow_volume: Vec<f64> = (0..closes.len())
        .map(|i| {
            let location = (closes[i] - lows[i]) - (highs[i] - closes[i]);
            ratio_or(location, highs[i] - lows[i], 0.0) * volumes[i]
        })
        .collect();
    let flow = rolling_sum(&flow_volume, period);
    let volume = rolling_sum(volumes, period);
    Ok(flow.iter().zip(&volume).map(|(f, v)| ratio_or(*f, *v, 0.0)).collect())
}

/// Volume expressed in this many shares per box in the ease-of-movement ratio.
const EMV_VOLUME_SCALE: f64 = 100_000_000.0;

/// SMA of the one-bar ease of movement: midpoint move per scaled volume
/// per unit of range. Bars without volume contribute 0.
pub fn ease_of_movement(highs: &[f64], lows: &[f64], volumes: &[f64], period: usize) -> Result<Vec<f64>> {
    ensure_aligned(&[highs, lows, volumes])?;

    let raw: Vec<f64> = (0..highs.len())
        .map(|i| {
            if i == 0 {
                return 0.0;
            }
            let distance = (highs[i] + lows[i]) / 2.0 - (highs[i - 1] + lows[i - 1]) / 2.0;
            let range = highs[i] - lows[i];
            ratio_or(distance * range, volumes[i] / EMV_VOLUME_SCALE, 0.0)
        })
        .collect();
    sma(&raw, period)
}

/// EMA of close change times volume.
pub fn force_index(closes: &[f64], volumes: &[f64], period: usize) -> Result<Vec<f64>> {
    ensure_aligned(&[closes, volumes])?;
    let raw: Vec<f64> = (0..closes.len())
        .map(|i| {
            if i == 0 {
                0.0
            } else {
                (closes[i] - closes[i - 1]) * volumes[i]
            }
        })
        .collect();
    ema(&raw, period)
}

/// Money flow index in [0, 100]; 50 while no money has flowed.
pub fn money_flow_index(bars: &[Bar], period: usize) -> Result<Vec<f64>> {
    let mut ind = MoneyFlowIndex::new(period).map_err(indicator_err)?;
    Ok(bars
        .iter()
        .map(|bar| {
            let v = ind.next(bar);
            if v.is_finite() {
                v
            } else {
                50.0
            }
        })
        .collect())
}

/// Starting level of the negative volume index.
pub const NVI_BASE: f64 = 1000.0;

/// Negative volume index: moves with the close only on bars whose volume
/// fell from the previous bar.
pub fn negative_volume_index(closes: &[f64], volumes: &[f64]) -> Result<Vec<f64>> {
    ensure_aligned(&[closes, volumes])?;
    let mut nvi = NVI_BASE;
    Ok((0..closes.len())
        .map(|i| {
            if i > 0 && volumes[i] < volumes[i - 1] && closes[i - 1] > f64::EPSILON {
                nvi *= closes[i] / closes[i - 1];
            }
            nvi
        })
        .collect())
}

fn ensure_aligned(series: &[&[f64]]) -> Result<()> {
    if let Some(first) = series.first() {
        ensure!(
            series.iter().all(|s| s.len() == first.len()),
            "indicator inputs differ in length"
        );
    }
    Ok(())
}
