use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use trade_sentinel::config::Config;
use trade_sentinel::models::{
    Alert, Candle, CandleSeries, IndicatorSnapshot, Market, MarketContext, Oscillators,
    PriceAction, Timeframe, Trend, TrendMeasures, VolatilityMeasures, VolumeProfile,
};
use trade_sentinel::strategies::signals::ApprovedTrade;
use trade_sentinel::trading::alerts::AlertSink;
use trade_sentinel::trading::execution::ExecutionSink;

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Snapshot with every bullish indicator firing at price 100.
pub fn bullish_snapshot(symbol: &str, ts: DateTime<Utc>) -> IndicatorSnapshot {
    IndicatorSnapshot {
        symbol: symbol.to_string(),
        market: Market::Crypto,
        timeframe: Timeframe::H1,
        timestamp: ts,
        oscillators: Oscillators {
            rsi: 22.0,
            stochastic_k: 15.0,
            stochastic_d: 18.0,
            williams_r: -85.0,
            cci: -120.0,
            momentum: 1.2,
        },
        trend: TrendMeasures {
            macd: 0.8,
            macd_signal: 0.5,
            macd_histogram: 0.3,
            ema_20: 98.0,
            ema_50: 96.0,
            ema_200: 90.0,
            sma_20: 97.5,
            sma_50: 95.0,
            sma_200: 91.0,
            adx: 42.0,
        },
        volatility: VolatilityMeasures {
            atr: 1.5,
            bb_upper: 103.0,
            bb_middle: 99.0,
            bb_lower: 95.0,
        },
        price_action: PriceAction {
            trend: Trend::Bullish,
            support: vec![97.0],
            resistance: vec![106.0],
            volatility_pct: 1.5,
            volume_profile: VolumeProfile::Normal,
        },
    }
}

/// Neutral readings: no side reaches the score floor.
pub fn flat_snapshot(symbol: &str, ts: DateTime<Utc>) -> IndicatorSnapshot {
    let mut s = bullish_snapshot(symbol, ts);
    s.oscillators = Oscillators {
        rsi: 50.0,
        stochastic_k: 50.0,
        stochastic_d: 50.0,
        williams_r: -50.0,
        cci: 0.0,
        momentum: 0.0,
    };
    s.trend.macd_histogram = 0.0;
    s.trend.ema_20 = 100.0;
    s.trend.ema_50 = 100.0;
    s.trend.ema_200 = 100.0;
    s.trend.sma_20 = 100.0;
    s.trend.sma_50 = 100.0;
    s.price_action.trend = Trend::Sideways;
    s
}

pub fn market_context(snapshot: &IndicatorSnapshot) -> MarketContext {
    let start = snapshot.timestamp - Duration::minutes(30);
    let closes = [99.8, 100.0, 100.2, 100.0];
    let candles: Vec<Candle> = (0..30)
        .map(|i| {
            let close = closes[i % closes.len()];
            Candle {
                timestamp: start + Duration::minutes(i as i64 + 1),
                open: 100.0,
                high: close + 0.75,
                low: close - 0.75,
                close,
                volume: 100.0,
            }
        })
        .collect();

    MarketContext {
        price: 100.0,
        volume: 1_200.0,
        average_volume: 1_000.0,
        candles: CandleSeries::new(candles),
    }
}

/// Default config with a fresh data directory per test and a cheap ledger.
pub fn test_config(name: &str) -> Config {
    let dir = std::env::temp_dir().join(format!("trade_sentinel_it_{}", name));
    let _ = std::fs::remove_dir_all(&dir);
    let mut cfg = Config::default();
    cfg.data_dir = dir.to_string_lossy().to_string();
    cfg.ledger.export_path = dir.join("ledger.json").to_string_lossy().to_string();
    cfg.ledger.difficulty = 1;
    cfg.ledger.batch_size = 4;
    cfg.alerts.base_backoff_ms = 1;
    cfg.alerts.timeout_ms = 200;
    cfg.log_level = "ERROR".to_string();
    cfg
}

/// Sink that keeps everything it is handed.
#[derive(Default)]
pub struct RecordingSink {
    pub alerts: Mutex<Vec<Alert>>,
    pub trades: Mutex<Vec<ApprovedTrade>>,
}

impl RecordingSink {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[async_trait]
impl ExecutionSink for RecordingSink {
    async fn execute(&self, trade: &ApprovedTrade) -> Result<()> {
        self.trades.lock().await.push(trade.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
