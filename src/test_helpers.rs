use chrono::{DateTime, Duration, Utc};

use crate::config::{Config, LedgerConfig};
use crate::models::{
    Candle, CandleSeries, Direction, IndicatorSnapshot, Market, MarketContext, Oscillators,
    PriceAction, Timeframe, Trend, TrendMeasures, VolatilityMeasures, VolumeProfile,
};
use crate::strategies::signals::CandidateSignal;

/// 2024-01-15 12:00 UTC, a Monday.
pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing 1m timestamps.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let base = base_time();

    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            timestamp: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();

    CandleSeries::new(candles)
}

/// Create n falling (bearish) candles starting from `start` price.
pub fn make_bearish_trend(n: usize, start: f64) -> CandleSeries {
    let base = base_time();

    let candles: Vec<Candle> = (0..n)
        .map(|i| {
            let open = start - i as f64 * 10.0;
            let close = open - 8.0;
            Candle {
                timestamp: base + Duration::minutes(i as i64),
                open,
                high: open + 1.0,
                low: close - 2.0,
                close,
                volume: 100.0,
            }
        })
        .collect();

    CandleSeries::new(candles)
}

/// Every bullish indicator firing: 12/12 points, price 100, ATR 1.5.
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

/// Mirror of `bullish_snapshot`.
pub fn bearish_snapshot(symbol: &str, ts: DateTime<Utc>) -> IndicatorSnapshot {
    IndicatorSnapshot {
        symbol: symbol.to_string(),
        market: Market::Crypto,
        timeframe: Timeframe::H1,
        timestamp: ts,
        oscillators: Oscillators {
            rsi: 78.0,
            stochastic_k: 85.0,
            stochastic_d: 82.0,
            williams_r: -10.0,
            cci: 130.0,
            momentum: -1.2,
        },
        trend: TrendMeasures {
            macd: -0.8,
            macd_signal: -0.5,
            macd_histogram: -0.3,
            ema_20: 102.0,
            ema_50: 104.0,
            ema_200: 110.0,
            sma_20: 102.5,
            sma_50: 105.0,
            sma_200: 109.0,
            adx: 42.0,
        },
        volatility: VolatilityMeasures {
            atr: 1.5,
            bb_upper: 105.0,
            bb_middle: 101.0,
            bb_lower: 97.0,
        },
        price_action: PriceAction {
            trend: Trend::Bearish,
            support: vec![94.0],
            resistance: vec![103.0],
            volatility_pct: 1.5,
            volume_profile: VolumeProfile::Normal,
        },
    }
}

/// Price 100 on 30 quiet one-minute bars of 1.5 range each.
pub fn market_context(snapshot: &IndicatorSnapshot) -> MarketContext {
    let start = snapshot.timestamp - Duration::minutes(30);
    let closes = [99.8, 100.0, 100.2, 100.0];
    let candles: Vec<Candle> = (0..30)
        .map(|i| {
            let close = closes[i % closes.len()];
            let open = if i == 0 { 100.0 } else { closes[(i - 1) % closes.len()] };
            Candle {
                timestamp: start + Duration::minutes(i as i64 + 1),
                open,
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

/// A BTC-USD candidate at entry 100 with a 2-point stop and a 4-point target.
pub fn make_candidate(direction: Direction, confidence: f64) -> CandidateSignal {
    let sign = direction.sign();
    CandidateSignal {
        id: format!("SIG-BTC-USD-1h-{}-{}", base_time().timestamp_millis(), direction),
        symbol: "BTC-USD".to_string(),
        market: Market::Crypto,
        timeframe: Timeframe::H1,
        direction,
        confidence,
        entry_price: 100.0,
        stop_loss: 100.0 - sign * 2.0,
        take_profit: 100.0 + sign * 4.0,
        risk_reward: 2.0,
        win_probability: 0.6,
        pattern: None,
        pattern_confidence: None,
        mtf_alignment: Some(0.8),
        bullish_score: if direction == Direction::Buy { 10.0 } else { 0.0 },
        bearish_score: if direction == Direction::Sell { 10.0 } else { 0.0 },
        snapshot_time: base_time(),
        created_at: base_time(),
    }
}

/// Defaults with a cheap ledger, a throwaway data dir and quiet logging.
pub fn default_test_config() -> Config {
    Config {
        ledger: LedgerConfig {
            difficulty: 1,
            export_path: std::env::temp_dir()
                .join("trade_sentinel_test")
                .join("ledger.json")
                .to_string_lossy()
                .to_string(),
            ..LedgerConfig::default()
        },
        data_dir: std::env::temp_dir()
            .join("trade_sentinel_test")
            .to_string_lossy()
            .to_string(),
        log_level: "ERROR".to_string(),
        ..Config::default()
    }
}
