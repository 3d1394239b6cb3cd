use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::SltpConfig;
use crate::core::sessions::LiquidityCalendar;
use crate::models::{
    CandleSeries, Direction, IndicatorSnapshot, MarketContext, StopMethod, TargetMethod,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLoss {
    pub price: f64,
    /// Distance from entry as % of entry.
    pub pct: f64,
    pub method: StopMethod,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialTarget {
    pub price: f64,
    pub weight: f64,
    pub risk_reward: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfit {
    pub price: f64,
    pub pct: f64,
    pub method: TargetMethod,
    pub rationale: String,
    /// Ordered nearest first; weights sum to 1.
    pub partials: Vec<PartialTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SltpLevels {
    pub stop_loss: StopLoss,
    pub take_profit: TakeProfit,
    pub risk_reward: f64,
    pub position_size: f64,
    pub max_risk_amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PivotKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PivotSource {
    Swing,
    Support,
    Resistance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pivot {
    pub kind: PivotKind,
    pub price: f64,
    pub source: PivotSource,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Everything `size` needs beyond the levels themselves.
#[derive(Debug, Clone)]
pub struct SizingInputs {
    pub balance: f64,
    pub risk_pct: f64,
    pub confidence: f64,
    /// Combined breaker and gate multiplier.
    pub multiplier: f64,
    pub at: DateTime<Utc>,
}

/// Per-symbol parameters the optimiser moves around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolTuning {
    pub min_risk_reward: f64,
    pub max_position_size_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SltpAdjustment {
    pub symbol: String,
    pub parameter: String,
    pub old_value: f64,
    pub new_value: f64,
    pub reason: String,
    pub sample_size: usize,
    pub timestamp: DateTime<Utc>,
}

/// True-range rolling average over the last `period` bars. Falls back to the
/// last bar's range when there is not enough history.
pub fn calculate_atr(candles: &CandleSeries, period: usize) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    if candles.len() < period || period == 0 {
        return candles.last().map_or(0.0, |c| c.total_range());
    }

    let trs = candles.true_ranges();
    let start = trs.len().saturating_sub(period);
    let slice = &trs[start..];
    slice.iter().sum::<f64>() / slice.len() as f64
}

/// Swing highs and lows: bars whose high (low) is the extreme of the
/// surrounding `lookback` bars on each side.
pub fn find_pivots(candles: &CandleSeries, lookback: usize) -> Vec<Pivot> {
    let len = candles.len();
    let mut pivots = Vec::new();
    if lookback == 0 || len < lookback * 2 + 1 {
        return pivots;
    }

    for i in lookback..(len - lookback) {
        let window = candles.slice(i - lookback, i + lookback + 1);
        if candles[i].high >= window.highs_max() {
            pivots.push(Pivot {
                kind: PivotKind::High,
                price: candles[i].high,
                source: PivotSource::Swing,
                timestamp: Some(candles[i].timestamp),
            });
        }
        if candles[i].low <= window.lows_min() {
            pivots.push(Pivot {
                kind: PivotKind::Low,
                price: candles[i].low,
                source: PivotSource::Swing,
                timestamp: Some(candles[i].timestamp),
            });
        }
    }

    pivots
}

/// Units to trade so that hitting the stop loses `risk_pct` of `balance`.
pub fn position_size(balance: f64, risk_pct: f64, entry: f64, stop: f64) -> f64 {
    let distance = (entry - stop).abs();
    if distance <= 0.0 || balance <= 0.0 || risk_pct <= 0.0 {
        return 0.0;
    }
    balance * risk_pct / 100.0 / distance
}

pub struct SltpCalculator {
    cfg: SltpConfig,
    calendar: LiquidityCalendar,
    tuning: HashMap<String, SymbolTuning>,
    pub adjustment_history: Vec<SltpAdjustment>,
}

impl SltpCalculator {
    pub fn new(cfg: SltpConfig) -> Self {
        Self {
            cfg,
            calendar: LiquidityCalendar::default(),
            tuning: HashMap::new(),
            adjustment_history: Vec::new(),
        }
    }

    pub fn config(&self) -> &SltpConfig {
        &self.cfg
    }

    pub fn tuning(&self, symbol: &str) -> SymbolTuning {
        self.tuning.get(symbol).cloned().unwrap_or(SymbolTuning {
            min_risk_reward: self.cfg.min_risk_reward,
            max_position_size_pct: self.cfg.max_position_size_pct,
        })
    }

    /// ATR from candles when there are any, else the snapshot's own reading.
    pub fn atr(&self, snapshot: &IndicatorSnapshot, ctx: &MarketContext) -> f64 {
        let from_candles = calculate_atr(&ctx.candles, self.cfg.atr_period);
        if from_candles > 0.0 {
            from_candles
        } else {
            snapshot.volatility.atr
        }
    }

    /// Candle swings plus the snapshot's support and resistance levels.
    pub fn pivots(&self, snapshot: &IndicatorSnapshot, ctx: &MarketContext) -> Vec<Pivot> {
        let mut pivots = find_pivots(&ctx.candles, self.cfg.swing_lookback);
        pivots.extend(snapshot.price_action.support.iter().map(|&p| Pivot {
            kind: PivotKind::Low,
            price: p,
            source: PivotSource::Support,
            timestamp: None,
        }));
        pivots.extend(snapshot.price_action.resistance.iter().map(|&p| Pivot {
            kind: PivotKind::High,
            price: p,
            source: PivotSource::Resistance,
            timestamp: None,
        }));
        pivots
    }

    /// Nearer of the ATR stop and a buffered structural stop. Ties go to structure.
    pub fn stop_loss(&self, direction: Direction, entry: f64, atr: f64, pivots: &[Pivot]) -> StopLoss {
        let atr_distance = atr * self.cfg.atr_stop_multiple;
        let atr_stop = entry - direction.sign() * atr_distance;

        let max_distance = entry * self.cfg.structure_max_distance_pct / 100.0;
        let buffer = atr * self.cfg.structure_buffer_atr;
        let wanted = match direction {
            Direction::Buy => PivotKind::Low,
            Direction::Sell => PivotKind::High,
        };
        let structural = pivots
            .iter()
            .filter(|p| p.kind == wanted)
            .filter(|p| {
                let d = (entry - p.price) * direction.sign();
                d > 0.0 && d <= max_distance
            })
            .min_by(|a, b| {
                let da = (entry - a.price).abs();
                let db = (entry - b.price).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|p| (p, p.price - direction.sign() * buffer));

        match structural {
            Some((pivot, price)) if (entry - price).abs() <= atr_distance || atr_distance <= 0.0 => {
                StopLoss {
                    price,
                    pct: round4((entry - price).abs() / entry * 100.0),
                    method: StopMethod::Structure,
                    rationale: format!(
                        "{:?} pivot @ {:.4} buffered by {:.2} ATR",
                        pivot.source, pivot.price, self.cfg.structure_buffer_atr
                    ),
                }
            }
            _ => StopLoss {
                price: atr_stop,
                pct: round4(atr_distance / entry * 100.0),
                method: StopMethod::Atr,
                rationale: format!("{:.1} x ATR ({:.4})", self.cfg.atr_stop_multiple, atr),
            },
        }
    }

    /// Structural targets past the minimum-RR distance, else Fibonacci extensions of it.
    pub fn take_profit(
        &self,
        direction: Direction,
        entry: f64,
        stop: f64,
        min_risk_reward: f64,
        pivots: &[Pivot],
    ) -> TakeProfit {
        let risk = (entry - stop).abs();
        let min_distance = risk * min_risk_reward;
        let max_distance = risk * self.cfg.max_risk_reward;
        let wanted = match direction {
            Direction::Buy => PivotKind::High,
            Direction::Sell => PivotKind::Low,
        };

        let mut structural: Vec<f64> = pivots
            .iter()
            .filter(|p| p.kind == wanted)
            .map(|p| p.price)
            .filter(|&p| {
                let d = (p - entry) * direction.sign();
                d >= min_distance && d <= max_distance
            })
            .collect();
        structural.sort_by(|a, b| {
            let da = (a - entry).abs();
            let db = (b - entry).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        structural.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);

        let (prices, method, rationale) = if !structural.is_empty() {
            (
                structural,
                TargetMethod::Structure,
                format!("structural levels beyond {:.2}R", min_risk_reward),
            )
        } else {
            let prices = self
                .cfg
                .fib_ladder
                .iter()
                .map(|r| entry + direction.sign() * min_distance * r)
                .collect();
            (
                prices,
                TargetMethod::Fibonacci,
                format!("Fibonacci extensions of {:.2}R", min_risk_reward),
            )
        };

        let count = if self.cfg.partial_targets {
            prices.len().min(self.cfg.partial_weights.len()).min(3)
        } else {
            1
        };
        let partials = self.partials(&prices[..count.min(prices.len())], entry, risk);
        let price = partials.first().map_or(entry + direction.sign() * min_distance, |p| p.price);

        TakeProfit {
            price,
            pct: round4((price - entry).abs() / entry * 100.0),
            method,
            rationale,
            partials,
        }
    }

    /// Full level set for a direction at `entry`, before sizing.
    pub fn calculate_levels(
        &self,
        symbol: &str,
        direction: Direction,
        entry: f64,
        snapshot: &IndicatorSnapshot,
        ctx: &MarketContext,
    ) -> SltpLevels {
        let atr = self.atr(snapshot, ctx);
        let pivots = self.pivots(snapshot, ctx);
        let tuning = self.tuning(symbol);

        let stop_loss = self.stop_loss(direction, entry, atr, &pivots);
        let take_profit = self.take_profit(
            direction,
            entry,
            stop_loss.price,
            tuning.min_risk_reward,
            &pivots,
        );
        let risk = (entry - stop_loss.price).abs();
        let risk_reward = if risk > 0.0 {
            round4((take_profit.price - entry).abs() / risk)
        } else {
            0.0
        };

        SltpLevels {
            stop_loss,
            take_profit,
            risk_reward,
            position_size: 0.0,
            max_risk_amount: 0.0,
        }
    }

    /// Levels plus a position size after volatility, confidence, liquidity and
    /// risk-state adjustments, capped at the symbol's max position size.
    pub fn size(
        &self,
        symbol: &str,
        direction: Direction,
        entry: f64,
        snapshot: &IndicatorSnapshot,
        ctx: &MarketContext,
        inputs: &SizingInputs,
    ) -> SltpLevels {
        let mut levels = self.calculate_levels(symbol, direction, entry, snapshot, ctx);
        let tuning = self.tuning(symbol);
        let stop = levels.stop_loss.price;

        let base = position_size(inputs.balance, inputs.risk_pct, entry, stop);

        let atr = self.atr(snapshot, ctx);
        let vol_pct = if entry > 0.0 { atr / entry * 100.0 } else { 0.0 };
        let volatility_factor = if vol_pct > 2.0 {
            (2.0 / vol_pct).max(0.5)
        } else {
            1.0
        };
        let confidence_factor = (0.5 + inputs.confidence.clamp(0.0, 1.0) * 0.5).clamp(0.5, 1.0);
        let liquidity_factor = match self.calendar.low_window_at(inputs.at) {
            Some(window) => {
                debug!("{} sizing inside low-liquidity window {}", symbol, window);
                self.cfg.low_liquidity_factor
            }
            None => 1.0,
        };

        let mut units = base
            * volatility_factor
            * confidence_factor
            * liquidity_factor
            * inputs.multiplier.max(0.0);

        if entry > 0.0 {
            let max_units = inputs.balance * tuning.max_position_size_pct / 100.0 / entry;
            units = units.min(max_units);
        }

        levels.position_size = units;
        levels.max_risk_amount = round2(units * (entry - stop).abs());
        levels
    }

    /// Nudge a symbol's min RR and size cap toward the target win rate.
    ///
    /// `avg_win_r` is the realised R-multiple of recent winners. RR is only
    /// relaxed while winners still reach the current minimum, and a losing
    /// symbol whose winners fall short of it tightens by two steps.
    pub fn optimize(
        &mut self,
        symbol: &str,
        trades: usize,
        win_rate: f64,
        avg_win_r: Option<f64>,
        now: DateTime<Utc>,
    ) -> Vec<SltpAdjustment> {
        if trades < self.cfg.optimization_min_trades {
            return Vec::new();
        }
        let current = self.tuning(symbol);
        let base_size = self.cfg.max_position_size_pct;
        let reaching_target = !matches!(avg_win_r, Some(r) if r < current.min_risk_reward);

        let (new_rr, new_size) = if win_rate < self.cfg.target_win_rate {
            let steps = if reaching_target { 1.0 } else { 2.0 };
            (
                (current.min_risk_reward + steps * self.cfg.rr_step).min(self.cfg.rr_ceiling),
                (current.max_position_size_pct * (1.0 - self.cfg.size_step))
                    .max(self.cfg.min_position_size_pct),
            )
        } else if win_rate > self.cfg.target_win_rate {
            let rr = if reaching_target {
                (current.min_risk_reward - self.cfg.rr_step).max(self.cfg.rr_floor)
            } else {
                current.min_risk_reward
            };
            (
                rr,
                (current.max_position_size_pct * (1.0 + self.cfg.size_step)).min(base_size),
            )
        } else {
            return Vec::new();
        };

        let reason = match avg_win_r {
            Some(r) => format!(
                "win rate {:.2} vs target {:.2}, winners at {:.2}R over {} trades",
                win_rate, self.cfg.target_win_rate, r, trades
            ),
            None => format!(
                "win rate {:.2} vs target {:.2} over {} trades",
                win_rate, self.cfg.target_win_rate, trades
            ),
        };
        let mut adjustments = Vec::new();
        let mut push = |parameter: &str, old_value: f64, new_value: f64| {
            if (new_value - old_value).abs() > f64::EPSILON {
                adjustments.push(SltpAdjustment {
                    symbol: symbol.to_string(),
                    parameter: parameter.to_string(),
                    old_value,
                    new_value,
                    reason: reason.clone(),
                    sample_size: trades,
                    timestamp: now,
                });
            }
        };
        let new_rr = round4(new_rr);
        let new_size = round4(new_size);
        push("min_risk_reward", current.min_risk_reward, new_rr);
        push("max_position_size_pct", current.max_position_size_pct, new_size);

        if !adjustments.is_empty() {
            for a in &adjustments {
                info!(
                    "SL/TP tuning {} {}: {:.4} -> {:.4} ({})",
                    a.symbol, a.parameter, a.old_value, a.new_value, a.reason
                );
            }
            self.tuning.insert(
                symbol.to_string(),
                SymbolTuning {
                    min_risk_reward: new_rr,
                    max_position_size_pct: new_size,
                },
            );
            self.adjustment_history.extend(adjustments.clone());
        }
        adjustments
    }

    // --- Internal methods ---

    fn partials(&self, prices: &[f64], entry: f64, risk: f64) -> Vec<PartialTarget> {
        if prices.is_empty() {
            return Vec::new();
        }
        if prices.len() == 1 {
            return vec![PartialTarget {
                price: prices[0],
                weight: 1.0,
                risk_reward: rr(entry, risk, prices[0]),
            }];
        }
        let weights = &self.cfg.partial_weights[..prices.len()];
        let total: f64 = weights.iter().sum();
        prices
            .iter()
            .zip(weights)
            .map(|(&price, &w)| PartialTarget {
                price,
                weight: if total > 0.0 { w / total } else { 1.0 / prices.len() as f64 },
                risk_reward: rr(entry, risk, price),
            })
            .collect()
    }
}

fn rr(entry: f64, risk: f64, target: f64) -> f64 {
    if risk <= 0.0 {
        0.0
    } else {
        round4((target - entry).abs() / risk)
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        base_time, market_context, bullish_snapshot, make_bearish_trend, make_candles,
    };

    fn calc() -> SltpCalculator {
        SltpCalculator::new(SltpConfig::default())
    }

    #[test]
    fn position_size_formula() {
        assert!((position_size(100_000.0, 1.0, 100.0, 98.0) - 500.0).abs() < 1e-9);
        assert!((position_size(100_000.0, 1.0, 100.0, 102.0) - 500.0).abs() < 1e-9);
        assert_eq!(position_size(100_000.0, 1.0, 100.0, 100.0), 0.0);
    }

    #[test]
    fn atr_averages_true_range() {
        let candles = make_candles(&[
            (100.0, 102.0, 99.0, 101.0),
            (101.0, 104.0, 100.0, 103.0),
            (103.0, 105.0, 101.0, 102.0),
        ]);
        // TRs: 3, 4, 4
        assert!((calculate_atr(&candles, 2) - 4.0).abs() < 1e-9);
        assert!((calculate_atr(&candles, 3) - 11.0 / 3.0).abs() < 1e-9);
        // Not enough bars: last range.
        assert!((calculate_atr(&candles, 14) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn pivots_found_in_zigzag() {
        let candles = make_candles(&[
            (100.0, 101.0, 99.0, 100.0),
            (100.0, 103.0, 99.5, 102.0),
            (102.0, 106.0, 101.0, 105.0),
            (105.0, 104.0, 100.0, 101.0),
            (101.0, 102.0, 97.0, 98.0),
            (98.0, 101.0, 97.5, 100.0),
            (100.0, 103.0, 99.0, 102.0),
        ]);
        let pivots = find_pivots(&candles, 2);
        assert!(pivots
            .iter()
            .any(|p| p.kind == PivotKind::High && (p.price - 106.0).abs() < 1e-9));
        assert!(pivots
            .iter()
            .any(|p| p.kind == PivotKind::Low && (p.price - 97.0).abs() < 1e-9));
    }

    #[test]
    fn structure_stop_wins_when_nearer() {
        let c = calc();
        let pivots = vec![Pivot {
            kind: PivotKind::Low,
            price: 98.0,
            source: PivotSource::Support,
            timestamp: None,
        }];
        // ATR 2 -> ATR stop 97.0; structure 98 - 0.5 = 97.5 is nearer.
        let sl = c.stop_loss(Direction::Buy, 100.0, 2.0, &pivots);
        assert_eq!(sl.method, StopMethod::Structure);
        assert!((sl.price - 97.5).abs() < 1e-9);

        // Equal distance: structure 97.5 + 0.5 buffer = 97.0, same as ATR stop.
        let pivots = vec![Pivot {
            kind: PivotKind::Low,
            price: 97.5,
            source: PivotSource::Swing,
            timestamp: None,
        }];
        let sl = c.stop_loss(Direction::Buy, 100.0, 2.0, &pivots);
        assert_eq!(sl.method, StopMethod::Structure);
    }

    #[test]
    fn atr_stop_when_structure_is_far() {
        let c = calc();
        let pivots = vec![
            Pivot {
                kind: PivotKind::High,
                price: 101.0,
                source: PivotSource::Resistance,
                timestamp: None,
            },
            Pivot {
                kind: PivotKind::High,
                price: 120.0,
                source: PivotSource::Resistance,
                timestamp: None,
            },
        ];
        let sl = c.stop_loss(Direction::Sell, 100.0, 0.4, &pivots);
        // ATR stop 100.6 is nearer than 101 + 0.1.
        assert_eq!(sl.method, StopMethod::Atr);
        assert!((sl.price - 100.6).abs() < 1e-9);
    }

    #[test]
    fn fibonacci_targets_when_no_structure() {
        let c = calc();
        let tp = c.take_profit(Direction::Buy, 100.0, 98.0, 1.5, &[]);
        assert_eq!(tp.method, TargetMethod::Fibonacci);
        assert_eq!(tp.partials.len(), 3);
        assert!((tp.partials[0].price - 103.0).abs() < 1e-9);
        assert!((tp.partials[1].price - 104.854).abs() < 1e-9);
        assert!((tp.partials[2].price - 107.854).abs() < 1e-9);
        let weights: Vec<f64> = tp.partials.iter().map(|p| p.weight).collect();
        assert!((weights[0] - 0.5).abs() < 1e-9);
        assert!((weights[1] - 0.3).abs() < 1e-9);
        assert!((weights[2] - 0.2).abs() < 1e-9);
        assert!((tp.price - 103.0).abs() < 1e-9);
    }

    #[test]
    fn structural_targets_renormalise_weights() {
        let c = calc();
        let pivots = vec![
            Pivot {
                kind: PivotKind::Low,
                price: 95.0,
                source: PivotSource::Support,
                timestamp: None,
            },
            Pivot {
                kind: PivotKind::Low,
                price: 93.0,
                source: PivotSource::Support,
                timestamp: None,
            },
            // Inside min-RR distance, skipped.
            Pivot {
                kind: PivotKind::Low,
                price: 98.0,
                source: PivotSource::Swing,
                timestamp: None,
            },
        ];
        let tp = c.take_profit(Direction::Sell, 100.0, 102.0, 1.5, &pivots);
        assert_eq!(tp.method, TargetMethod::Structure);
        assert_eq!(tp.partials.len(), 2);
        assert!((tp.partials[0].price - 95.0).abs() < 1e-9);
        assert!((tp.partials[0].weight - 0.625).abs() < 1e-9);
        assert!((tp.partials[1].weight - 0.375).abs() < 1e-9);
    }

    #[test]
    fn size_caps_at_max_position() {
        let c = calc();
        let snap = bullish_snapshot("BTC-USD", base_time());
        let ctx = market_context(&snap);
        let inputs = SizingInputs {
            balance: 100_000.0,
            risk_pct: 1.0,
            confidence: 1.0,
            multiplier: 1.0,
            at: base_time(),
        };
        let levels = c.size("BTC-USD", Direction::Buy, ctx.price, &snap, &ctx, &inputs);
        let notional = levels.position_size * ctx.price;
        assert!(levels.position_size > 0.0);
        assert!(notional <= 100_000.0 * 0.10 + 1e-6);
        assert!(levels.stop_loss.price < ctx.price);
        assert!(levels.take_profit.price > ctx.price);
        assert!(levels.risk_reward >= 1.5 - 1e-9);
    }

    #[test]
    fn low_liquidity_and_multiplier_shrink_size() {
        let c = calc();
        let candles = make_bearish_trend(30, 500.0);
        let mut snap = bullish_snapshot("ETH-USD", base_time());
        snap.volatility.atr = 2.0;
        let mut ctx = market_context(&snap);
        ctx.candles = candles;
        ctx.price = 210.0;
        let liquid = SizingInputs {
            balance: 1_000.0,
            risk_pct: 1.0,
            confidence: 1.0,
            multiplier: 1.0,
            at: base_time(),
        };
        let a = c.size("ETH-USD", Direction::Sell, 210.0, &snap, &ctx, &liquid);
        let weekend = SizingInputs {
            at: base_time() - chrono::Duration::days(2),
            ..liquid.clone()
        };
        let b = c.size("ETH-USD", Direction::Sell, 210.0, &snap, &ctx, &weekend);
        let halved = SizingInputs {
            multiplier: 0.5,
            ..liquid
        };
        let d = c.size("ETH-USD", Direction::Sell, 210.0, &snap, &ctx, &halved);
        assert!(b.position_size < a.position_size);
        assert!(d.position_size < a.position_size);
    }

    #[test]
    fn optimizer_tightens_then_relaxes() {
        let mut c = calc();
        let now = base_time();
        assert!(c.optimize("BTC-USD", 5, 0.2, None, now).is_empty());

        let adj = c.optimize("BTC-USD", 20, 0.3, None, now);
        assert_eq!(adj.len(), 2);
        let t = c.tuning("BTC-USD");
        assert!((t.min_risk_reward - 1.75).abs() < 1e-9);
        assert!((t.max_position_size_pct - 9.0).abs() < 1e-9);

        c.optimize("BTC-USD", 30, 0.7, Some(2.0), now);
        let t = c.tuning("BTC-USD");
        assert!((t.min_risk_reward - 1.5).abs() < 1e-9);
        assert!((t.max_position_size_pct - 9.9).abs() < 1e-9);

        c.optimize("BTC-USD", 40, 0.7, Some(2.0), now);
        assert!((c.tuning("BTC-USD").max_position_size_pct - 10.0).abs() < 1e-9);
        // Other symbols keep defaults.
        assert!((c.tuning("ETH-USD").min_risk_reward - 1.5).abs() < 1e-9);
    }

    #[test]
    fn optimizer_weighs_realised_risk_reward() {
        let mut c = calc();
        let now = base_time();

        // Winning often but winners stop short of 1.5R: keep the RR floor.
        let adj = c.optimize("BTC-USD", 20, 0.7, Some(1.2), now);
        assert!(adj.iter().all(|a| a.parameter != "min_risk_reward"));
        assert!((c.tuning("BTC-USD").min_risk_reward - 1.5).abs() < 1e-9);

        // Losing and winners short of target: two steps up.
        c.optimize("ETH-USD", 20, 0.3, Some(1.0), now);
        assert!((c.tuning("ETH-USD").min_risk_reward - 2.0).abs() < 1e-9);

        // Winners clear the floor: relax one step.
        c.optimize("ETH-USD", 30, 0.7, Some(2.4), now);
        assert!((c.tuning("ETH-USD").min_risk_reward - 1.75).abs() < 1e-9);
    }
}
