use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::ScorerConfig;
use crate::core::multi_timeframe;
use crate::core::patterns::{PatternLibrary, PatternMatch};
use crate::models::{Direction, IndicatorSnapshot, MarketContext, Trend, VolumeProfile};
use crate::strategies::signals::{risk_reward, CandidateSignal};

const RSI_WEIGHT: f64 = 2.0;
const STOCHASTIC_WEIGHT: f64 = 1.0;
const WILLIAMS_WEIGHT: f64 = 1.0;
const CCI_WEIGHT: f64 = 1.0;
const MACD_WEIGHT: f64 = 2.0;
const EMA_STACK_WEIGHT: f64 = 2.0;
const SMA_STACK_WEIGHT: f64 = 1.0;
const ADX_TREND_WEIGHT: f64 = 1.0;
const MOMENTUM_WEIGHT: f64 = 1.0;
pub const MAX_SCORE: f64 = RSI_WEIGHT
    + STOCHASTIC_WEIGHT
    + WILLIAMS_WEIGHT
    + CCI_WEIGHT
    + MACD_WEIGHT
    + EMA_STACK_WEIGHT
    + SMA_STACK_WEIGHT
    + ADX_TREND_WEIGHT
    + MOMENTUM_WEIGHT;

const BASE_BLEND: f64 = 0.6;
const PATTERN_BLEND: f64 = 0.4;
const HISTORY_MIN_SAMPLES: usize = 10;
const HISTORY_BLEND: f64 = 0.2;

/// Why a snapshot produced no candidate. An ordinary outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoSignal {
    VolatilityTooHigh { volatility_pct: f64, ceiling: f64 },
    LowVolume,
    WeakTrend { adx: f64, min: f64 },
    WeakScore { bullish: f64, bearish: f64 },
    LowAlignment { score: f64, min: f64 },
    LowConfidence { confidence: f64, min: f64 },
    RiskRewardOutOfBounds { risk_reward: f64, min: f64, max: f64 },
    InvalidLevels,
}

impl fmt::Display for NoSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoSignal::VolatilityTooHigh {
                volatility_pct,
                ceiling,
            } => write!(f, "volatility {:.2}% above {:.2}%", volatility_pct, ceiling),
            NoSignal::LowVolume => write!(f, "low volume profile"),
            NoSignal::WeakTrend { adx, min } => write!(f, "ADX {:.1} below {:.1}", adx, min),
            NoSignal::WeakScore { bullish, bearish } => {
                write!(f, "no clear side (bull {:.0} / bear {:.0})", bullish, bearish)
            }
            NoSignal::LowAlignment { score, min } => {
                write!(f, "timeframe alignment {:.2} below {:.2}", score, min)
            }
            NoSignal::LowConfidence { confidence, min } => {
                write!(f, "confidence {:.2} below {:.2}", confidence, min)
            }
            NoSignal::RiskRewardOutOfBounds { risk_reward, min, max } => {
                write!(f, "R:R {:.2} outside [{:.2}, {:.2}]", risk_reward, min, max)
            }
            NoSignal::InvalidLevels => write!(f, "no usable ATR or price"),
        }
    }
}

/// Weighted bullish and bearish tallies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalScore {
    pub bullish: f64,
    pub bearish: f64,
}

impl DirectionalScore {
    /// Winning side, if it clears `min_ratio` of the max and beats the other by
    /// strictly more than `margin`.
    pub fn direction(&self, min_ratio: f64, margin: f64) -> Option<Direction> {
        let floor = MAX_SCORE * min_ratio;
        if self.bullish >= floor && self.bullish - self.bearish > margin {
            Some(Direction::Buy)
        } else if self.bearish >= floor && self.bearish - self.bullish > margin {
            Some(Direction::Sell)
        } else {
            None
        }
    }
}

/// Success history for one symbol, supplied by the performance tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalStats {
    pub samples: usize,
    pub success_ratio: f64,
}

pub fn tally(s: &IndicatorSnapshot, min_adx: f64) -> DirectionalScore {
    let o = &s.oscillators;
    let t = &s.trend;
    let mut bull = 0.0;
    let mut bear = 0.0;

    if o.rsi < 30.0 {
        bull += RSI_WEIGHT;
    } else if o.rsi > 70.0 {
        bear += RSI_WEIGHT;
    }

    if o.stochastic_k < 20.0 {
        bull += STOCHASTIC_WEIGHT;
    } else if o.stochastic_k > 80.0 {
        bear += STOCHASTIC_WEIGHT;
    }

    if o.williams_r < -80.0 {
        bull += WILLIAMS_WEIGHT;
    } else if o.williams_r > -20.0 {
        bear += WILLIAMS_WEIGHT;
    }

    if o.cci < -100.0 {
        bull += CCI_WEIGHT;
    } else if o.cci > 100.0 {
        bear += CCI_WEIGHT;
    }

    if t.macd_histogram > 0.0 && t.macd > t.macd_signal {
        bull += MACD_WEIGHT;
    } else if t.macd_histogram < 0.0 && t.macd < t.macd_signal {
        bear += MACD_WEIGHT;
    }

    if s.ema_stack_bullish() {
        bull += EMA_STACK_WEIGHT;
    } else if s.ema_stack_bearish() {
        bear += EMA_STACK_WEIGHT;
    }

    if t.sma_20 > t.sma_50 {
        bull += SMA_STACK_WEIGHT;
    } else if t.sma_20 < t.sma_50 {
        bear += SMA_STACK_WEIGHT;
    }

    if t.adx >= min_adx {
        match s.price_action.trend {
            Trend::Bullish => bull += ADX_TREND_WEIGHT,
            Trend::Bearish => bear += ADX_TREND_WEIGHT,
            Trend::Sideways => {}
        }
    }

    if o.momentum > 0.0 {
        bull += MOMENTUM_WEIGHT;
    } else if o.momentum < 0.0 {
        bear += MOMENTUM_WEIGHT;
    }

    DirectionalScore {
        bullish: bull,
        bearish: bear,
    }
}

pub struct SignalScorer {
    cfg: ScorerConfig,
    patterns: PatternLibrary,
}

impl SignalScorer {
    pub fn new(cfg: ScorerConfig) -> Self {
        Self::with_patterns(cfg, PatternLibrary::default())
    }

    pub fn with_patterns(cfg: ScorerConfig, patterns: PatternLibrary) -> Self {
        Self { cfg, patterns }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.cfg
    }

    /// Score one snapshot. Everything on the returned candidate is fixed here.
    pub fn score(
        &self,
        s: &IndicatorSnapshot,
        ctx: &MarketContext,
        history: Option<&HistoricalStats>,
        now: DateTime<Utc>,
    ) -> Result<CandidateSignal, NoSignal> {
        let result = self.evaluate(s, ctx, history, now);
        if let Err(reason) = &result {
            debug!("{} {}: no signal, {}", s.symbol, s.timeframe, reason);
        }
        result
    }

    fn evaluate(
        &self,
        s: &IndicatorSnapshot,
        ctx: &MarketContext,
        history: Option<&HistoricalStats>,
        now: DateTime<Utc>,
    ) -> Result<CandidateSignal, NoSignal> {
        let thresholds = self.cfg.thresholds(s.market);

        // 1. Market suitability
        if s.price_action.volatility_pct > thresholds.max_volatility_pct {
            return Err(NoSignal::VolatilityTooHigh {
                volatility_pct: s.price_action.volatility_pct,
                ceiling: thresholds.max_volatility_pct,
            });
        }
        if s.price_action.volume_profile == VolumeProfile::Low {
            return Err(NoSignal::LowVolume);
        }
        if s.trend.adx < self.cfg.min_adx {
            return Err(NoSignal::WeakTrend {
                adx: s.trend.adx,
                min: self.cfg.min_adx,
            });
        }

        // 2. Directional score
        let score = tally(s, self.cfg.min_adx);
        let direction = score
            .direction(self.cfg.min_score_ratio, self.cfg.score_margin)
            .ok_or(NoSignal::WeakScore {
                bullish: score.bullish,
                bearish: score.bearish,
            })?;
        let winning = match direction {
            Direction::Buy => score.bullish,
            Direction::Sell => score.bearish,
        };
        let mut confidence = winning / MAX_SCORE;

        let entry = ctx.price;
        if !(entry.is_finite() && entry > 0.0) {
            return Err(NoSignal::InvalidLevels);
        }

        // 3. Multi-timeframe alignment
        let mtf_alignment = if self.cfg.use_multi_timeframe {
            let a = multi_timeframe::analyze(s, entry, direction);
            if a.alignment_score < self.cfg.min_alignment {
                return Err(NoSignal::LowAlignment {
                    score: a.alignment_score,
                    min: self.cfg.min_alignment,
                });
            }
            Some(round4(a.alignment_score))
        } else {
            None
        };

        // 4. Pattern confirmation
        let pattern: Option<PatternMatch> = if self.cfg.use_patterns {
            self.patterns.best_match(s, ctx, direction)
        } else {
            None
        };
        if let Some(p) = &pattern {
            confidence = BASE_BLEND * confidence + PATTERN_BLEND * p.confidence;
        }

        // 5. Market multiplier
        confidence = (confidence * thresholds.confidence_multiplier).clamp(0.0, 1.0);

        // 6. Levels
        let atr = s.volatility.atr;
        if !(atr.is_finite() && atr > 0.0) {
            return Err(NoSignal::InvalidLevels);
        }
        let sign = direction.sign();
        let stop_loss = entry - sign * atr * self.cfg.atr_stop_multiple;
        let take_profit = entry + sign * atr * self.cfg.atr_target_multiple;
        let rr = risk_reward(entry, stop_loss, take_profit);

        if confidence < self.cfg.min_confidence {
            return Err(NoSignal::LowConfidence {
                confidence,
                min: self.cfg.min_confidence,
            });
        }
        if rr <= 0.0 || rr < self.cfg.min_risk_reward || rr > self.cfg.max_risk_reward {
            return Err(NoSignal::RiskRewardOutOfBounds {
                risk_reward: rr,
                min: self.cfg.min_risk_reward,
                max: self.cfg.max_risk_reward,
            });
        }

        // 7. Win probability
        let win_probability = self.win_probability(s, direction, pattern.is_some(), history);

        Ok(CandidateSignal {
            id: format!(
                "SIG-{}-{}-{}-{}",
                s.symbol,
                s.timeframe,
                s.timestamp.timestamp_millis(),
                direction
            ),
            symbol: s.symbol.clone(),
            market: s.market,
            timeframe: s.timeframe,
            direction,
            confidence: round4(confidence),
            entry_price: entry,
            stop_loss,
            take_profit,
            risk_reward: round4(rr),
            win_probability: round4(win_probability),
            pattern: pattern.as_ref().map(|p| p.name.clone()),
            pattern_confidence: pattern.as_ref().map(|p| round4(p.confidence)),
            mtf_alignment,
            bullish_score: score.bullish,
            bearish_score: score.bearish,
            snapshot_time: s.timestamp,
            created_at: now,
        })
    }

    pub fn win_probability(
        &self,
        s: &IndicatorSnapshot,
        direction: Direction,
        has_pattern: bool,
        history: Option<&HistoricalStats>,
    ) -> f64 {
        let mut p: f64 = 0.5;
        if s.price_action.trend.agrees_with(direction) {
            p += 0.10;
        }
        if s.trend.adx > 40.0 {
            p += 0.10;
        } else if s.trend.adx > 25.0 {
            p += 0.05;
        }
        let extreme = match direction {
            Direction::Buy => s.oscillators.rsi < 30.0,
            Direction::Sell => s.oscillators.rsi > 70.0,
        };
        if extreme {
            p += 0.05;
        }
        if has_pattern {
            p += 0.05;
        }
        p = p.clamp(0.05, 0.95);

        match history {
            Some(h) if h.samples >= HISTORY_MIN_SAMPLES => {
                (1.0 - HISTORY_BLEND) * p + HISTORY_BLEND * h.success_ratio.clamp(0.0, 1.0)
            }
            _ => p,
        }
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
