use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Direction, IndicatorSnapshot, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Short,
    Medium,
    Long,
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Horizon::Short => write!(f, "short"),
            Horizon::Medium => write!(f, "medium"),
            Horizon::Long => write!(f, "long"),
        }
    }
}

/// One horizon's read of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonView {
    pub horizon: Horizon,
    pub trend: Trend,
    /// 0..=1
    pub strength: f64,
    pub signal: Option<Direction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeAlignment {
    pub direction: Direction,
    pub views: Vec<HorizonView>,
    pub trend_agreement: f64,
    pub mean_strength: f64,
    pub signal_density: f64,
    pub alignment_score: f64,
}

const TREND_WEIGHT: f64 = 0.5;
const STRENGTH_WEIGHT: f64 = 0.3;
const SIGNAL_WEIGHT: f64 = 0.2;

/// Short: EMA20, stochastic, momentum.
pub fn short_view(s: &IndicatorSnapshot, price: f64) -> HorizonView {
    let o = &s.oscillators;
    let trend = trend_against(price, s.trend.ema_20);
    let strength = ((o.stochastic_k - 50.0).abs() / 50.0).clamp(0.0, 1.0);
    let signal = if o.momentum > 0.0 && o.stochastic_k < 80.0 {
        Some(Direction::Buy)
    } else if o.momentum < 0.0 && o.stochastic_k > 20.0 {
        Some(Direction::Sell)
    } else {
        None
    };
    HorizonView {
        horizon: Horizon::Short,
        trend,
        strength,
        signal,
    }
}

/// Medium: EMA50 and MACD.
pub fn medium_view(s: &IndicatorSnapshot, price: f64) -> HorizonView {
    let t = &s.trend;
    let trend = trend_against(price, t.ema_50);
    let scale = (s.volatility.atr * 0.1).max(f64::EPSILON);
    let strength = (t.macd_histogram.abs() / scale).clamp(0.0, 1.0);
    let signal = if t.macd_histogram > 0.0 && t.macd > t.macd_signal {
        Some(Direction::Buy)
    } else if t.macd_histogram < 0.0 && t.macd < t.macd_signal {
        Some(Direction::Sell)
    } else {
        None
    };
    HorizonView {
        horizon: Horizon::Medium,
        trend,
        strength,
        signal,
    }
}

/// Long: EMA200, SMA200 and ADX.
pub fn long_view(s: &IndicatorSnapshot, price: f64) -> HorizonView {
    let t = &s.trend;
    let trend = if price > t.ema_200 && price > t.sma_200 {
        Trend::Bullish
    } else if price < t.ema_200 && price < t.sma_200 {
        Trend::Bearish
    } else {
        Trend::Sideways
    };
    let strength = (t.adx / 50.0).clamp(0.0, 1.0);
    let signal = if t.adx >= 25.0 {
        trend.to_direction()
    } else {
        None
    };
    HorizonView {
        horizon: Horizon::Long,
        trend,
        strength,
        signal,
    }
}

/// 0.5 x trend agreement + 0.3 x mean strength + 0.2 x signal density, all
/// measured against `direction`.
pub fn analyze(s: &IndicatorSnapshot, price: f64, direction: Direction) -> TimeframeAlignment {
    let views = vec![
        short_view(s, price),
        medium_view(s, price),
        long_view(s, price),
    ];
    let n = views.len() as f64;
    let trend_agreement = views
        .iter()
        .filter(|v| v.trend.agrees_with(direction))
        .count() as f64
        / n;
    let mean_strength = views.iter().map(|v| v.strength).sum::<f64>() / n;
    let signal_density = views
        .iter()
        .filter(|v| v.signal == Some(direction))
        .count() as f64
        / n;
    let alignment_score = TREND_WEIGHT * trend_agreement
        + STRENGTH_WEIGHT * mean_strength
        + SIGNAL_WEIGHT * signal_density;

    TimeframeAlignment {
        direction,
        views,
        trend_agreement,
        mean_strength,
        signal_density,
        alignment_score,
    }
}

fn trend_against(price: f64, average: f64) -> Trend {
    if price > average {
        Trend::Bullish
    } else if price < average {
        Trend::Bearish
    } else {
        Trend::Sideways
    }
}
