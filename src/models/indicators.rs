use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CandleSeries, Market, Timeframe, Trend, VolumeProfile};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Oscillators {
    pub rsi: f64,
    pub stochastic_k: f64,
    pub stochastic_d: f64,
    pub williams_r: f64,
    pub cci: f64,
    pub momentum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendMeasures {
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub ema_20: f64,
    pub ema_50: f64,
    pub ema_200: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub sma_200: f64,
    pub adx: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityMeasures {
    pub atr: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceAction {
    pub trend: Trend,
    #[serde(default)]
    pub support: Vec<f64>,
    #[serde(default)]
    pub resistance: Vec<f64>,
    /// ATR-style volatility as a percentage of price.
    pub volatility_pct: f64,
    pub volume_profile: VolumeProfile,
}

/// Pre-computed technical state for one symbol/timeframe. Produced by the
/// analysis collaborator and never modified here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub market: Market,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub oscillators: Oscillators,
    pub trend: TrendMeasures,
    pub volatility: VolatilityMeasures,
    pub price_action: PriceAction,
}

impl IndicatorSnapshot {
    pub fn ema_stack_bullish(&self) -> bool {
        self.trend.ema_20 > self.trend.ema_50 && self.trend.ema_50 > self.trend.ema_200
    }

    pub fn ema_stack_bearish(&self) -> bool {
        self.trend.ema_20 < self.trend.ema_50 && self.trend.ema_50 < self.trend.ema_200
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.timestamp > max_age
    }
}

/// Live price/volume context that accompanies a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub price: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub average_volume: f64,
    #[serde(default)]
    pub candles: CandleSeries,
}

impl MarketContext {
    pub fn relative_volume(&self) -> f64 {
        if self.average_volume > 0.0 {
            self.volume / self.average_volume
        } else {
            1.0
        }
    }
}
