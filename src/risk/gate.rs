use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{debug, info};

use crate::error::RiskError;
use crate::models::RiskTier;
use crate::risk::circuit_breaker::DrawdownState;
use crate::risk::limits::RiskLimits;
use crate::risk::rate_limit::RateLimiter;
use crate::strategies::signals::CandidateSignal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    TradingHalted,
    LowConfidence { confidence: f64, floor: f64 },
    RiskRewardOutOfBounds { risk_reward: f64, min: f64, max: f64 },
    InvalidLevels,
    DailyLossLimit { loss_pct: f64, limit_pct: f64 },
    WeeklyLossLimit { loss_pct: f64, limit_pct: f64 },
    MonthlyLossLimit { loss_pct: f64, limit_pct: f64 },
    ConsecutiveLosses { count: u32, limit: u32 },
    StopTradingDrawdown { drawdown_pct: f64, limit_pct: f64 },
    EmergencyStop { drawdown_pct: f64, limit_pct: f64 },
    RateLimited { used: u32, limit: u32 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TradingHalted => write!(f, "trading halted"),
            RejectReason::LowConfidence { confidence, floor } => {
                write!(f, "confidence {:.2} below floor {:.2}", confidence, floor)
            }
            RejectReason::RiskRewardOutOfBounds { risk_reward, min, max } => write!(
                f,
                "R:R {:.2} outside [{:.2}, {:.2}]",
                risk_reward, min, max
            ),
            RejectReason::InvalidLevels => write!(f, "stop sits on entry"),
            RejectReason::DailyLossLimit { loss_pct, limit_pct } => {
                write!(f, "daily loss {:.2}% >= {:.2}%", loss_pct, limit_pct)
            }
            RejectReason::WeeklyLossLimit { loss_pct, limit_pct } => {
                write!(f, "weekly loss {:.2}% >= {:.2}%", loss_pct, limit_pct)
            }
            RejectReason::MonthlyLossLimit { loss_pct, limit_pct } => {
                write!(f, "monthly loss {:.2}% >= {:.2}%", loss_pct, limit_pct)
            }
            RejectReason::ConsecutiveLosses { count, limit } => {
                write!(f, "{} consecutive losses (limit {})", count, limit)
            }
            RejectReason::StopTradingDrawdown {
                drawdown_pct,
                limit_pct,
            } => write!(
                f,
                "drawdown {:.2}% reached stop-trading level {:.2}%",
                drawdown_pct, limit_pct
            ),
            RejectReason::EmergencyStop {
                drawdown_pct,
                limit_pct,
            } => write!(
                f,
                "drawdown {:.2}% reached emergency level {:.2}%",
                drawdown_pct, limit_pct
            ),
            RejectReason::RateLimited { used, limit } => {
                write!(f, "{} signals this hour (limit {})", used, limit)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Approve,
    ApproveAdjusted { size_multiplier: f64, reason: String },
    Reject { reason: RejectReason },
}

impl GateDecision {
    pub fn is_approved(&self) -> bool {
        !matches!(self, GateDecision::Reject { .. })
    }

    /// Size multiplier the gate imposes on top of the breaker's.
    pub fn size_multiplier(&self) -> f64 {
        match self {
            GateDecision::Approve => 1.0,
            GateDecision::ApproveAdjusted {
                size_multiplier, ..
            } => *size_multiplier,
            GateDecision::Reject { .. } => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub pnl: f64,
    pub closed_at: DateTime<Utc>,
}

/// Per-account limit checks that sit between the breaker and sizing.
pub struct RiskGate {
    account_id: String,
    limits: RiskLimits,
    min_risk_reward: f64,
    max_risk_reward: f64,
    /// Per-symbol RR floors set by SL/TP tuning; override `min_risk_reward`.
    symbol_min_risk_reward: HashMap<String, f64>,
    results: VecDeque<TradeResult>,
    consecutive_losses: u32,
    rate_limiter: RateLimiter,
}

impl RiskGate {
    pub fn new(
        account_id: &str,
        limits: RiskLimits,
        min_risk_reward: f64,
        max_risk_reward: f64,
    ) -> Self {
        let rate_limiter = RateLimiter::hourly(limits.max_signals_per_hour);
        Self {
            account_id: account_id.to_string(),
            limits,
            min_risk_reward,
            max_risk_reward,
            symbol_min_risk_reward: HashMap::new(),
            results: VecDeque::new(),
            consecutive_losses: 0,
            rate_limiter,
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn set_symbol_min_risk_reward(&mut self, symbol: &str, min_risk_reward: f64) {
        let min = min_risk_reward.min(self.max_risk_reward);
        if self.symbol_min_risk_reward.insert(symbol.to_string(), min) != Some(min) {
            debug!("Gate R:R floor for {} now {:.2}", symbol, min);
        }
    }

    pub fn min_risk_reward_for(&self, symbol: &str) -> f64 {
        self.symbol_min_risk_reward
            .get(symbol)
            .copied()
            .unwrap_or(self.min_risk_reward)
    }

    /// Hand back a rate slot taken by an approval that was never recorded.
    pub fn release_slot(&mut self, now: DateTime<Utc>) {
        self.rate_limiter.release(&self.account_id, now);
    }

    pub fn update_limits(&mut self, limits: RiskLimits) -> Result<(), RiskError> {
        limits.validate()?;
        self.rate_limiter.set_max(limits.max_signals_per_hour);
        info!(
            "Risk limits updated for {}: risk/trade {:.2}%, max position {:.2}%",
            self.account_id, limits.max_risk_per_trade_pct, limits.max_position_size_pct
        );
        self.limits = limits;
        Ok(())
    }

    /// Run every account check against a candidate. Approved candidates consume
    /// one slot of the hourly rate limit; rejected ones do not.
    pub fn validate(
        &mut self,
        candidate: &CandidateSignal,
        dd: &DrawdownState,
        equity: f64,
        now: DateTime<Utc>,
    ) -> GateDecision {
        match self.check(candidate, dd, equity, now) {
            Ok(decision) => {
                if !self.rate_limiter.try_acquire(&self.account_id, now) {
                    return self.reject(
                        candidate,
                        RejectReason::RateLimited {
                            used: self.rate_limiter.used(&self.account_id, now),
                            limit: self.limits.max_signals_per_hour,
                        },
                    );
                }
                debug!("Gate approved {}: {:?}", candidate.id, decision);
                decision
            }
            Err(reason) => self.reject(candidate, reason),
        }
    }

    pub fn record_trade_result(&mut self, pnl: f64, closed_at: DateTime<Utc>) {
        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
        self.results.push_back(TradeResult { pnl, closed_at });
        let horizon = closed_at - Duration::days(30);
        while self
            .results
            .front()
            .is_some_and(|r| r.closed_at < horizon)
        {
            self.results.pop_front();
        }
    }

    /// Realised net loss inside the window, as % of equity. Zero when net positive.
    pub fn loss_pct(&self, window: Duration, equity: f64, now: DateTime<Utc>) -> f64 {
        if equity <= 0.0 {
            return 0.0;
        }
        let since = now - window;
        let net: f64 = self
            .results
            .iter()
            .filter(|r| r.closed_at > since && r.closed_at <= now)
            .map(|r| r.pnl)
            .sum();
        if net >= 0.0 {
            0.0
        } else {
            -net / equity * 100.0
        }
    }

    // --- Internal methods ---

    fn check(
        &self,
        c: &CandidateSignal,
        dd: &DrawdownState,
        equity: f64,
        now: DateTime<Utc>,
    ) -> Result<GateDecision, RejectReason> {
        let l = &self.limits;

        if dd.tier == RiskTier::Halted || dd.trading_paused {
            return Err(RejectReason::TradingHalted);
        }
        if c.confidence < dd.min_confidence {
            return Err(RejectReason::LowConfidence {
                confidence: c.confidence,
                floor: dd.min_confidence,
            });
        }
        if c.risk_distance() <= 0.0 {
            return Err(RejectReason::InvalidLevels);
        }
        let min_rr = self.min_risk_reward_for(&c.symbol);
        if c.risk_reward < min_rr || c.risk_reward > self.max_risk_reward {
            return Err(RejectReason::RiskRewardOutOfBounds {
                risk_reward: c.risk_reward,
                min: min_rr,
                max: self.max_risk_reward,
            });
        }

        if dd.current_drawdown_pct >= l.emergency_stop_drawdown_pct {
            return Err(RejectReason::EmergencyStop {
                drawdown_pct: dd.current_drawdown_pct,
                limit_pct: l.emergency_stop_drawdown_pct,
            });
        }
        if dd.current_drawdown_pct >= l.stop_trading_drawdown_pct {
            return Err(RejectReason::StopTradingDrawdown {
                drawdown_pct: dd.current_drawdown_pct,
                limit_pct: l.stop_trading_drawdown_pct,
            });
        }

        let daily = self.loss_pct(Duration::days(1), equity, now);
        if daily >= l.max_daily_loss_pct {
            return Err(RejectReason::DailyLossLimit {
                loss_pct: daily,
                limit_pct: l.max_daily_loss_pct,
            });
        }
        let weekly = self.loss_pct(Duration::days(7), equity, now);
        if weekly >= l.max_weekly_loss_pct {
            return Err(RejectReason::WeeklyLossLimit {
                loss_pct: weekly,
                limit_pct: l.max_weekly_loss_pct,
            });
        }
        let monthly = self.loss_pct(Duration::days(30), equity, now);
        if monthly >= l.max_monthly_loss_pct {
            return Err(RejectReason::MonthlyLossLimit {
                loss_pct: monthly,
                limit_pct: l.max_monthly_loss_pct,
            });
        }

        if self.consecutive_losses >= l.max_consecutive_losses {
            return Err(RejectReason::ConsecutiveLosses {
                count: self.consecutive_losses,
                limit: l.max_consecutive_losses,
            });
        }

        if !self.rate_limiter.check(&self.account_id, now) {
            return Err(RejectReason::RateLimited {
                used: self.rate_limiter.used(&self.account_id, now),
                limit: l.max_signals_per_hour,
            });
        }

        // Notional implied by risking max_risk_per_trade_pct at this stop distance.
        let risk_amount = equity * l.max_risk_per_trade_pct / 100.0;
        let units = risk_amount / c.risk_distance();
        let notional = units * c.entry_price;
        let max_notional = equity * l.max_position_size_pct / 100.0;
        if notional > max_notional && notional > 0.0 {
            let size_multiplier = max_notional / notional;
            return Ok(GateDecision::ApproveAdjusted {
                size_multiplier,
                reason: format!(
                    "notional {:.2} exceeds max position {:.2}; scaled to {:.1}%",
                    notional,
                    max_notional,
                    size_multiplier * 100.0
                ),
            });
        }

        Ok(GateDecision::Approve)
    }

    fn reject(&self, c: &CandidateSignal, reason: RejectReason) -> GateDecision {
        info!("Gate rejected {} {} {}: {}", c.symbol, c.direction, c.id, reason);
        GateDecision::Reject { reason }
    }
}
