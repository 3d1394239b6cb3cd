use serde::{Deserialize, Serialize};

use crate::models::{Direction, IndicatorSnapshot, MarketContext};

/// A named boolean test over a snapshot and its market context.
#[derive(Clone, Copy)]
pub struct Condition {
    pub name: &'static str,
    pub check: fn(&IndicatorSnapshot, &MarketContext) -> bool,
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Pattern {
    pub name: &'static str,
    pub direction: Direction,
    /// Historical share of winning trades for this setup.
    pub win_rate: f64,
    /// How much the setup is trusted on its own.
    pub confidence: f64,
    pub conditions: Vec<Condition>,
}

impl Pattern {
    /// Fraction of conditions that hold.
    pub fn match_ratio(&self, s: &IndicatorSnapshot, ctx: &MarketContext) -> f64 {
        if self.conditions.is_empty() {
            return 0.0;
        }
        let hits = self.conditions.iter().filter(|c| (c.check)(s, ctx)).count();
        hits as f64 / self.conditions.len() as f64
    }

    pub fn pattern_confidence(&self) -> f64 {
        (self.win_rate + self.confidence) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub name: String,
    pub direction: Direction,
    pub match_ratio: f64,
    pub confidence: f64,
}

pub struct PatternLibrary {
    patterns: Vec<Pattern>,
    min_match_ratio: f64,
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::new(builtin_patterns())
    }
}

impl PatternLibrary {
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self {
            patterns,
            min_match_ratio: 0.8,
        }
    }

    pub fn register(&mut self, pattern: Pattern) {
        self.patterns.retain(|p| p.name != pattern.name);
        self.patterns.push(pattern);
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    /// Every pattern with at least 80% of its conditions satisfied.
    pub fn matches(&self, s: &IndicatorSnapshot, ctx: &MarketContext) -> Vec<PatternMatch> {
        self.patterns
            .iter()
            .filter_map(|p| {
                let ratio = p.match_ratio(s, ctx);
                (ratio >= self.min_match_ratio - 1e-9).then(|| PatternMatch {
                    name: p.name.to_string(),
                    direction: p.direction,
                    match_ratio: ratio,
                    confidence: p.pattern_confidence(),
                })
            })
            .collect()
    }

    /// Highest-confidence match pointing in `direction`.
    pub fn best_match(
        &self,
        s: &IndicatorSnapshot,
        ctx: &MarketContext,
        direction: Direction,
    ) -> Option<PatternMatch> {
        self.matches(s, ctx)
            .into_iter()
            .filter(|m| m.direction == direction)
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

fn cond(name: &'static str, check: fn(&IndicatorSnapshot, &MarketContext) -> bool) -> Condition {
    Condition { name, check }
}

pub fn builtin_patterns() -> Vec<Pattern> {
    vec![
        Pattern {
            name: "oversold_reversal",
            direction: Direction::Buy,
            win_rate: 0.58,
            confidence: 0.70,
            conditions: vec![
                cond("rsi_oversold", |s, _| s.oscillators.rsi < 30.0),
                cond("stochastic_oversold", |s, _| s.oscillators.stochastic_k < 20.0),
                cond("williams_oversold", |s, _| s.oscillators.williams_r < -80.0),
                cond("momentum_turning_up", |s, _| s.oscillators.momentum > 0.0),
                cond("above_long_average", |s, ctx| ctx.price > s.trend.ema_200),
            ],
        },
        Pattern {
            name: "overbought_reversal",
            direction: Direction::Sell,
            win_rate: 0.56,
            confidence: 0.70,
            conditions: vec![
                cond("rsi_overbought", |s, _| s.oscillators.rsi > 70.0),
                cond("stochastic_overbought", |s, _| s.oscillators.stochastic_k > 80.0),
                cond("williams_overbought", |s, _| s.oscillators.williams_r > -20.0),
                cond("momentum_turning_down", |s, _| s.oscillators.momentum < 0.0),
                cond("below_long_average", |s, ctx| ctx.price < s.trend.ema_200),
            ],
        },
        Pattern {
            name: "bullish_trend_continuation",
            direction: Direction::Buy,
            win_rate: 0.62,
            confidence: 0.75,
            conditions: vec![
                cond("ema_stack_bullish", |s, _| s.ema_stack_bullish()),
                cond("macd_positive", |s, _| s.trend.macd_histogram > 0.0),
                cond("adx_trending", |s, _| s.trend.adx > 25.0),
                cond("price_above_ema20", |s, ctx| ctx.price > s.trend.ema_20),
                cond("rsi_not_stretched", |s, _| {
                    s.oscillators.rsi > 40.0 && s.oscillators.rsi < 70.0
                }),
            ],
        },
        Pattern {
            name: "bearish_trend_continuation",
            direction: Direction::Sell,
            win_rate: 0.60,
            confidence: 0.75,
            conditions: vec![
                cond("ema_stack_bearish", |s, _| s.ema_stack_bearish()),
                cond("macd_negative", |s, _| s.trend.macd_histogram < 0.0),
                cond("adx_trending", |s, _| s.trend.adx > 25.0),
                cond("price_below_ema20", |s, ctx| ctx.price < s.trend.ema_20),
                cond("rsi_not_stretched", |s, _| {
                    s.oscillators.rsi > 30.0 && s.oscillators.rsi < 60.0
                }),
            ],
        },
        Pattern {
            name: "volatility_breakout_up",
            direction: Direction::Buy,
            win_rate: 0.55,
            confidence: 0.65,
            conditions: vec![
                cond("close_above_upper_band", |s, ctx| ctx.price > s.volatility.bb_upper),
                cond("volume_surge", |_, ctx| ctx.relative_volume() > 1.5),
                cond("adx_rising", |s, _| s.trend.adx > 20.0),
                cond("macd_positive", |s, _| s.trend.macd_histogram > 0.0),
                cond("momentum_positive", |s, _| s.oscillators.momentum > 0.0),
            ],
        },
        Pattern {
            name: "volatility_breakdown",
            direction: Direction::Sell,
            win_rate: 0.54,
            confidence: 0.65,
            conditions: vec![
                cond("close_below_lower_band", |s, ctx| ctx.price < s.volatility.bb_lower),
                cond("volume_surge", |_, ctx| ctx.relative_volume() > 1.5),
                cond("adx_rising", |s, _| s.trend.adx > 20.0),
                cond("macd_negative", |s, _| s.trend.macd_histogram < 0.0),
                cond("momentum_negative", |s, _| s.oscillators.momentum < 0.0),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{base_time, bearish_snapshot, market_context, bullish_snapshot};

    #[test]
    fn bullish_snapshot_matches_buy_patterns() {
        let lib = PatternLibrary::default();
        let s = bullish_snapshot("BTC-USD", base_time());
        let ctx = market_context(&s);
        let best = lib.best_match(&s, &ctx, Direction::Buy).unwrap();
        // Continuation holds 4/5 (RSI is stretched) and outranks the reversal.
        assert_eq!(best.name, "bullish_trend_continuation");
        assert!((best.match_ratio - 0.8).abs() < 1e-9);
        assert!((best.confidence - 0.685).abs() < 1e-9);
        assert!(lib.best_match(&s, &ctx, Direction::Sell).is_none());
    }

    #[test]
    fn below_threshold_is_no_match() {
        let lib = PatternLibrary::new(vec![Pattern {
            name: "needs_three",
            direction: Direction::Buy,
            win_rate: 0.5,
            confidence: 0.5,
            conditions: vec![
                cond("a", |_, _| true),
                cond("b", |_, _| true),
                cond("c", |_, _| false),
            ],
        }]);
        let s = bearish_snapshot("ETH-USD", base_time());
        let ctx = market_context(&s);
        assert!(lib.matches(&s, &ctx).is_empty());
    }

    #[test]
    fn register_replaces_by_name() {
        let mut lib = PatternLibrary::default();
        let n = lib.patterns().len();
        lib.register(Pattern {
            name: "oversold_reversal",
            direction: Direction::Buy,
            win_rate: 0.9,
            confidence: 0.9,
            conditions: vec![cond("always", |_, _| true)],
        });
        assert_eq!(lib.patterns().len(), n);
        let s = bullish_snapshot("BTC-USD", base_time());
        let ctx = market_context(&s);
        let best = lib.best_match(&s, &ctx, Direction::Buy).unwrap();
        assert_eq!(best.name, "oversold_reversal");
        assert!((best.confidence - 0.9).abs() < 1e-9);
    }
}
