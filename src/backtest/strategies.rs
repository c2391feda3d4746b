//! Technical strategy registry.
//!
//! Each strategy turns a price series into one [`Action`] per bar. Ids are the
//! stable identifiers the dashboard sends; names are display labels.

use anyhow::Result;
use serde::Serialize;

use super::indicators;
use super::metrics::Action;
use crate::market_data::PriceSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TechnicalStrategy {
    BuyHold,
    AwesomeOscillator,
    Rsi2,
    IchimokuCloud,
    StochasticOscillator,
    WilliamsR,
    Apo,
    Aroon,
    Bop,
    Cfo,
    Kdj,
    Macd,
    Psar,
    TypicalPrice,
    Vortex,
    AccelerationBands,
    BollingerBands,
    ProjectionOscillator,
    Cmf,
    Emv,
    ForceIndex,
    Mfi,
    Nvi,
    Vwap,
}

impl TechnicalStrategy {
    pub const ALL: [TechnicalStrategy; 24] = [
        TechnicalStrategy::BuyHold,
        TechnicalStrategy::AwesomeOscillator,
        TechnicalStrategy::Rsi2,
        TechnicalStrategy::IchimokuCloud,
        TechnicalStrategy::StochasticOscillator,
        TechnicalStrategy::WilliamsR,
        TechnicalStrategy::Apo,
        TechnicalStrategy::Aroon,
        TechnicalStrategy::Bop,
        TechnicalStrategy::Cfo,
        TechnicalStrategy::Kdj,
        TechnicalStrategy::Macd,
        TechnicalStrategy::Psar,
        TechnicalStrategy::TypicalPrice,
        TechnicalStrategy::Vortex,
        TechnicalStrategy::AccelerationBands,
        TechnicalStrategy::BollingerBands,
        TechnicalStrategy::ProjectionOscillator,
        TechnicalStrategy::Cmf,
        TechnicalStrategy::Emv,
        TechnicalStrategy::ForceIndex,
        TechnicalStrategy::Mfi,
        TechnicalStrategy::Nvi,
        TechnicalStrategy::Vwap,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            TechnicalStrategy::BuyHold => "buy-hold",
            TechnicalStrategy::AwesomeOscillator => "awesome-oscillator",
            TechnicalStrategy::Rsi2 => "rsi-2",
            TechnicalStrategy::IchimokuCloud => "ichimoku-cloud",
            TechnicalStrategy::StochasticOscillator => "stochastic-oscillator",
            TechnicalStrategy::WilliamsR => "williams-r",
            TechnicalStrategy::Apo => "apo",
            TechnicalStrategy::Aroon => "aroon",
            TechnicalStrategy::Bop => "bop",
            TechnicalStrategy::Cfo => "cfo",
            TechnicalStrategy::Kdj => "kdj",
            TechnicalStrategy::Macd => "macd",
            TechnicalStrategy::Psar => "psar",
            TechnicalStrategy::TypicalPrice => "typical-price",
            TechnicalStrategy::Vortex => "vortex",
            TechnicalStrategy::AccelerationBands => "acceleration-bands",
            TechnicalStrategy::BollingerBands => "bollinger-bands",
            TechnicalStrategy::ProjectionOscillator => "projection-oscillator",
            TechnicalStrategy::Cmf => "cmf",
            TechnicalStrategy::Emv => "emv",
            TechnicalStrategy::ForceIndex => "force-index",
            TechnicalStrategy::Mfi => "mfi",
            TechnicalStrategy::Nvi => "nvi",
            TechnicalStrategy::Vwap => "vwap",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TechnicalStrategy::BuyHold => "Buy Hold",
            TechnicalStrategy::AwesomeOscillator => "Awesome Oscillator",
            TechnicalStrategy::Rsi2 => "RSI 2",
            TechnicalStrategy::IchimokuCloud => "Ichimoku Cloud",
            TechnicalStrategy::StochasticOscillator => "Stochastic Oscillator",
            TechnicalStrategy::WilliamsR => "Williams R",
            TechnicalStrategy::Apo => "Absolute Price Oscillator (APO)",
            TechnicalStrategy::Aroon => "Aroon Strategy",
            TechnicalStrategy::Bop => "Balance of Power (BOM)",
            TechnicalStrategy::Cfo => "Chande Forecast Oscillator (CFO)",
            TechnicalStrategy::Kdj => "KDJ Strategy",
            TechnicalStrategy::Macd => "MACD Strategy",
            TechnicalStrategy::Psar => "Parabolic SAR",
            TechnicalStrategy::TypicalPrice => "Typical Price",
            TechnicalStrategy::Vortex => "Vortex Strategy",
            TechnicalStrategy::AccelerationBands => "Acceleration Bands",
            TechnicalStrategy::BollingerBands => "Bollinger Bands",
            TechnicalStrategy::ProjectionOscillator => "Projection Oscillator",
            TechnicalStrategy::Cmf => "Chaikin Money Flow (CMF)",
            TechnicalStrategy::Emv => "Ease of Movement (EMV)",
            TechnicalStrategy::ForceIndex => "Force Index",
            TechnicalStrategy::Mfi => "Money Flow Index",
            TechnicalStrategy::Nvi => "Negative Volume Index (NVI)",
            TechnicalStrategy::Vwap => "Volume Weighted Average Price",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|s| s.id().eq_ignore_ascii_case(id))
    }

    /// Per-bar actions for `series`.
    pub fn actions(&self, series: &PriceSeries) -> Result<Vec<Action>> {
        let closes = series.closes();
        let highs = series.highs();
        let lows = series.lows();
        let n = closes.len();

        let actions = match self {
            TechnicalStrategy::BuyHold => vec![Action::Buy; n],
            TechnicalStrategy::Rsi2 => indicators::rsi(&closes, 2)?
                .into_iter()
                .map(|r| threshold(r, 10.0, 90.0))
                .collect(),
            TechnicalStrategy::Macd => indicators::macd(&closes, 12, 26, 9)?
                .into_iter()
                .map(|p| sign(p.macd - p.signal))
                .collect(),
            TechnicalStrategy::BollingerBands => indicators::bollinger(&closes, 20, 2.0)?
                .into_iter()
                .zip(&closes)
                .map(|(band, &c)| {
                    if c > band.upper {
                        Action::Sell
                    } else if c < band.lower {
                        Action::Buy
                    } else {
                        Action::Hold
                    }
                })
                .collect(),
            TechnicalStrategy::WilliamsR => {
                indicators::williams_r(&highs, &lows, &closes, 14)?
                    .into_iter()
                    .map(|wr| {
                        if wr <= -80.0 {
                            Action::Buy
                        } else if wr >= -20.0 {
                            Action::Sell
                        } else {
                            Action::Hold
                        }
                    })
                    .collect()
            }
            TechnicalStrategy::StochasticOscillator => {
                let (k, d) = indicators::stochastic(&highs, &lows, &closes, 14, 3)?;
                k.into_iter()
                    .zip(d)
                    .map(|(k, d)| {
                        if k >= 80.0 && d >= 80.0 {
                            Action::Sell
                        } else if k <= 20.0 && d <= 20.0 {
                            Action::Buy
                        } else {
                            Action::Hold
                        }
                    })
                    .collect()
            }
            TechnicalStrategy::AwesomeOscillator => {
                indicators::awesome_oscillator(&highs, &lows)?
                    .into_iter()
                    .map(sign)
                    .collect()
            }
            TechnicalStrategy::Apo => indicators::absolute_price_oscillator(&closes, 14, 30)?
                .into_iter()
                .map(sign)
                .collect(),
            TechnicalStrategy::Aroon => {
                let (up, down) = indicators::aroon(&highs, &lows, 25)?;
                up.into_iter().zip(down).map(|(u, d)| sign(u - d)).collect()
            }
            TechnicalStrategy::Vwap => indicators::vwap(&closes, &series.volumes(), 14)?
                .into_iter()
                .zip(&closes)
                .map(|(vwap, &c)| sign(vwap - c))
                .collect(),
            TechnicalStrategy::Cfo => indicators::chande_forecast(&closes, 14)?
                .into_iter()
                .map(|cfo| sign(-cfo))
                .collect(),
            TechnicalStrategy::TypicalPrice => {
                let typical: Vec<f64> = series.bars.iter().map(|b| b.typical_price()).collect();
                let avg = indicators::sma(&typical, 20)?;
                typical
                    .iter()
                    .zip(&avg)
                    .map(|(t, a)| sign(t - a))
                    .collect()
            }
            TechnicalStrategy::IchimokuCloud => indicators::ichimoku(&highs, &lows)?
                .into_iter()
                .zip(&closes)
                .map(|(cloud, &c)| {
                    if c > cloud.span_a.max(cloud.span_b) {
                        Action::Buy
                    } else if c < cloud.span_a.min(cloud.span_b) {
                        Action::Sell
                    } else {
                        Action::Hold
                    }
                })
                .collect(),
            TechnicalStrategy::Bop => {
                indicators::balance_of_power(&series.opens(), &highs, &lows, &closes)?
                    .into_iter()
                    .map(sign)
                    .collect()
            }
            TechnicalStrategy::Kdj => indicators::kdj(&highs, &lows, &closes, 9, 3)?
                .into_iter()
                .map(|p| sign(p.k - p.d))
                .collect(),
            TechnicalStrategy::Psar => indicators::parabolic_sar(&highs, &lows, 0.02, 0.2)?
                .into_iter()
                .map(|p| if p.rising { Action::Buy } else { Action::Sell })
                .collect(),
            TechnicalStrategy::Vortex => {
                let (plus, minus) = indicators::vortex(&highs, &lows, &closes, 14)?;
                plus.into_iter().zip(minus).map(|(p, m)| sign(p - m)).collect()
            }
            TechnicalStrategy::AccelerationBands => {
                indicators::acceleration_bands(&highs, &lows, &closes, 20, 4.0)?
                    .into_iter()
                    .zip(&closes)
                    .map(|(band, &c)| {
                        if c >= band.upper {
                            Action::Buy
                        } else if c <= band.lower {
                            Action::Sell
                        } else {
                            Action::Hold
                        }
                    })
                    .collect()
            }
            TechnicalStrategy::ProjectionOscillator => {
                let (po, spo) = indicators::projection_oscillator(&highs, &lows, &closes, 14, 3)?;
                po.into_iter().zip(spo).map(|(p, s)| sign(p - s)).collect()
            }
            TechnicalStrategy::Cmf => {
                indicators::chaikin_money_flow(&highs, &lows, &closes, &series.volumes(), 20)?
                    .into_iter()
                    .map(sign)
                    .collect()
            }
            TechnicalStrategy::Emv => {
                indicators::ease_of_movement(&highs, &lows, &series.volumes(), 14)?
                    .into_iter()
                    .map(sign)
                    .collect()
            }
            TechnicalStrategy::ForceIndex => indicators::force_index(&closes, &series.volumes(), 13)?
                .into_iter()
                .map(sign)
                .collect(),
            TechnicalStrategy::Mfi => indicators::money_flow_index(&series.bars, 14)?
                .into_iter()
                .map(|mfi| {
                    if mfi >= 80.0 {
                        Action::Sell
                    } else if mfi <= 20.0 {
                        Action::Buy
                    } else {
                        Action::Hold
                    }
                })
                .collect(),
            TechnicalStrategy::Nvi => {
                let nvi = indicators::negative_volume_index(&closes, &series.volumes())?;
                let signal = indicators::ema(&nvi, 255)?;
                nvi.iter().zip(&signal).map(|(v, s)| sign(v - s)).collect()
            }
        };

        Ok(actions)
    }
}

/// Buy below `low`, sell above `high`.
fn threshold(value: f64, low: f64, high: f64) -> Action {
    if value < low {
        Action::Buy
    } else if value > high {
        Action::Sell
    } else {
        Action::Hold
    }
}

/// Buy on positive, sell on negative, hold on zero or NaN.
fn sign(value: f64) -> Action {
    if value > 0.0 {
        Action::Buy
    } else if value < 0.0 {
        Action::Sell
    } else {
        Action::Hold
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyInfo {
    pub id: &'static str,
    pub name: &'static str,
}

impl From<TechnicalStrategy> for StrategyInfo {
    fn from(s: TechnicalStrategy) -> Self {
        Self {
            id: s.id(),
            name: s.name(),
        }
    }
}

/// Resolved strategy selection.
#[derive(Debug, Clone, Default)]
pub struct StrategySelection {
    pub strategies: Vec<TechnicalStrategy>,
    pub ignored_ids: Vec<String>,
}

/// Empty `ids` selects every strategy. Otherwise known ids are kept in
/// registry order and unknown ones are reported back.
pub fn select_strategies(ids: &[String]) -> StrategySelection {
    if ids.is_empty() {
        return StrategySelection {
            strategies: TechnicalStrategy::ALL.to_vec(),
            ignored_ids: Vec::new(),
        };
    }

    let requested: Vec<Option<TechnicalStrategy>> =
        ids.iter().map(|id| TechnicalStrategy::from_id(id)).collect();

    let strategies = TechnicalStrategy::ALL
        .iter()
        .copied()
        .filter(|s| requested.contains(&Some(*s)))
        .collect();

    let ignored_ids = ids
        .iter()
        .zip(&requested)
        .filter(|(_, r)| r.is_none())
        .map(|(id, _)| id.clone())
        .collect();

    StrategySelection {
        strategies,
        ignored_ids,
    }
}
