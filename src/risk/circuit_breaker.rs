use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::config::DrawdownConfig;
use crate::error::RiskError;
use crate::models::{Alert, AlertSeverity, AlertType, RiskTier};
use crate::strategies::signals::CandidateSignal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub drawdown_pct: f64,
    pub is_new_peak: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownState {
    pub current_drawdown_pct: f64,
    pub max_drawdown_pct: f64,
    pub peak_equity: f64,
    pub peak_time: DateTime<Utc>,
    pub last_equity: f64,
    pub drawdown_start: Option<DateTime<Utc>>,
    pub drawdown_duration_secs: i64,
    pub tier: RiskTier,
    pub position_size_multiplier: f64,
    pub min_confidence: f64,
    pub trading_paused: bool,
    pub emergency_exit: bool,
    pub tighten_stops: bool,
    pub manual_override: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTransition {
    pub from: RiskTier,
    pub to: RiskTier,
    pub drawdown_pct: f64,
    pub at: DateTime<Utc>,
}

/// Result of feeding one equity observation to the breaker.
#[derive(Debug, Clone)]
pub struct EquityUpdate {
    pub state: DrawdownState,
    pub transition: Option<TierTransition>,
    /// Alerts that survived de-duplication and should be dispatched.
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptDecision {
    pub accepted: bool,
    pub reason: String,
    pub adjusted_confidence: f64,
    pub position_multiplier: f64,
}

/// Equity-driven tier state machine for one account.
///
/// Tiers escalate as soon as drawdown crosses a threshold. They only come back
/// down through a new equity peak or once drawdown falls under the recovery
/// threshold, so a bounce from 5% to 3.5% keeps the CRITICAL restrictions.
pub struct DrawdownCircuitBreaker {
    cfg: DrawdownConfig,
    base_min_confidence: f64,
    state: DrawdownState,
    history: VecDeque<EquityPoint>,
    last_alert: HashMap<AlertType, DateTime<Utc>>,
    manually_halted: bool,
    clock: SharedClock,
}

impl DrawdownCircuitBreaker {
    pub fn new(
        cfg: DrawdownConfig,
        base_min_confidence: f64,
        initial_equity: f64,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        let state = DrawdownState {
            current_drawdown_pct: 0.0,
            max_drawdown_pct: 0.0,
            peak_equity: initial_equity,
            peak_time: now,
            last_equity: initial_equity,
            drawdown_start: None,
            drawdown_duration_secs: 0,
            tier: RiskTier::Normal,
            position_size_multiplier: 1.0,
            min_confidence: base_min_confidence,
            trading_paused: false,
            emergency_exit: false,
            tighten_stops: false,
            manual_override: None,
            updated_at: now,
        };
        let mut history = VecDeque::new();
        history.push_back(EquityPoint {
            timestamp: now,
            equity: initial_equity,
            drawdown_pct: 0.0,
            is_new_peak: true,
        });

        Self {
            cfg,
            base_min_confidence,
            state,
            history,
            last_alert: HashMap::new(),
            manually_halted: false,
            clock,
        }
    }

    pub fn state(&self) -> DrawdownState {
        self.state.clone()
    }

    pub fn tier(&self) -> RiskTier {
        self.state.tier
    }

    pub fn is_halted(&self) -> bool {
        self.state.tier == RiskTier::Halted
    }

    pub fn equity_history(&self) -> Vec<EquityPoint> {
        self.history.iter().cloned().collect()
    }

    pub fn tier_for(&self, drawdown_pct: f64) -> RiskTier {
        if drawdown_pct >= self.cfg.halt_pct {
            RiskTier::Halted
        } else if drawdown_pct >= self.cfg.critical_pct {
            RiskTier::Critical
        } else if drawdown_pct >= self.cfg.warning_pct {
            RiskTier::Warning
        } else {
            RiskTier::Normal
        }
    }

    pub fn update_equity(&mut self, equity: f64) -> Result<EquityUpdate, RiskError> {
        if !equity.is_finite() || equity <= 0.0 {
            return Err(RiskError::InvalidEquity(equity));
        }
        let now = self.clock.now();
        let previous = self.state.tier;
        let is_new_peak = equity > self.state.peak_equity;

        self.state.last_equity = equity;
        self.state.updated_at = now;

        if is_new_peak {
            self.state.peak_equity = equity;
            self.state.peak_time = now;
            self.state.current_drawdown_pct = 0.0;
            self.state.drawdown_start = None;
            self.state.drawdown_duration_secs = 0;
            if !self.manually_halted {
                self.state.tier = RiskTier::Normal;
                self.state.manual_override = None;
            }
        } else {
            let peak = self.state.peak_equity;
            let dd = round4((peak - equity) * 100.0 / peak);
            self.state.current_drawdown_pct = dd;
            if dd > self.state.max_drawdown_pct {
                self.state.max_drawdown_pct = dd;
            }
            if dd > 0.0 {
                let start = *self.state.drawdown_start.get_or_insert(now);
                self.state.drawdown_duration_secs = (now - start).num_seconds();
            } else {
                self.state.drawdown_start = None;
                self.state.drawdown_duration_secs = 0;
            }

            let target = self.tier_for(dd);
            if target > self.state.tier {
                self.state.tier = target;
            } else if target < self.state.tier
                && dd < self.cfg.recovery_pct
                && !self.manually_halted
            {
                self.state.tier = RiskTier::Normal;
                self.state.manual_override = None;
            }
        }

        self.apply_policy();
        self.push_history(EquityPoint {
            timestamp: now,
            equity,
            drawdown_pct: self.state.current_drawdown_pct,
            is_new_peak,
        });

        let mut alerts = Vec::new();
        let transition = if self.state.tier != previous {
            let t = TierTransition {
                from: previous,
                to: self.state.tier,
                drawdown_pct: self.state.current_drawdown_pct,
                at: now,
            };
            self.log_transition(&t);
            if let Some(alert) = self.transition_alert(&t) {
                alerts.push(alert);
            }
            Some(t)
        } else {
            None
        };

        Ok(EquityUpdate {
            state: self.state.clone(),
            transition,
            alerts,
        })
    }

    /// Sole authority on whether a candidate may proceed to sizing.
    pub fn should_accept_signal(&self, candidate: &CandidateSignal) -> AcceptDecision {
        let s = &self.state;
        if s.trading_paused {
            return AcceptDecision {
                accepted: false,
                reason: format!(
                    "Trading paused: tier {} at {:.2}% drawdown",
                    s.tier, s.current_drawdown_pct
                ),
                adjusted_confidence: candidate.confidence,
                position_multiplier: 0.0,
            };
        }
        if candidate.confidence < s.min_confidence {
            return AcceptDecision {
                accepted: false,
                reason: format!(
                    "Confidence {:.2} below {} floor {:.2}",
                    candidate.confidence, s.tier, s.min_confidence
                ),
                adjusted_confidence: candidate.confidence,
                position_multiplier: s.position_size_multiplier,
            };
        }
        AcceptDecision {
            accepted: true,
            reason: format!("Accepted in tier {}", s.tier),
            adjusted_confidence: candidate.confidence,
            position_multiplier: s.position_size_multiplier,
        }
    }

    /// Force HALTED regardless of drawdown. Holds until `manual_resume`.
    pub fn manual_halt(&mut self, reason: &str) -> EquityUpdate {
        let now = self.clock.now();
        let previous = self.state.tier;
        self.manually_halted = true;
        self.state.tier = RiskTier::Halted;
        self.state.manual_override = Some(format!("halt: {}", reason));
        self.state.updated_at = now;
        self.apply_policy();
        warn!("Manual halt at {:.2}% drawdown: {}", self.state.current_drawdown_pct, reason);

        let mut alerts = Vec::new();
        if let Some(a) = self.emit(
            AlertType::ManualOverride,
            AlertSeverity::Critical,
            format!("Trading manually halted: {}", reason),
            self.state.current_drawdown_pct,
            self.cfg.halt_pct,
            now,
        ) {
            alerts.push(a);
        }
        let transition = (previous != RiskTier::Halted).then(|| TierTransition {
            from: previous,
            to: RiskTier::Halted,
            drawdown_pct: self.state.current_drawdown_pct,
            at: now,
        });

        EquityUpdate {
            state: self.state.clone(),
            transition,
            alerts,
        }
    }

    /// Lift a halt. Only allowed once drawdown is back under the halt threshold,
    /// and it lands in CRITICAL; NORMAL needs a real recovery or a new peak.
    pub fn manual_resume(&mut self, reason: &str) -> Result<EquityUpdate, RiskError> {
        let now = self.clock.now();
        let dd = self.state.current_drawdown_pct;
        if dd >= self.cfg.halt_pct {
            return Err(RiskError::ResumeDenied {
                tier: self.state.tier,
                drawdown_pct: dd,
                threshold_pct: self.cfg.halt_pct,
            });
        }

        self.manually_halted = false;
        if self.state.tier != RiskTier::Halted {
            return Ok(EquityUpdate {
                state: self.state.clone(),
                transition: None,
                alerts: Vec::new(),
            });
        }

        self.state.tier = RiskTier::Critical;
        self.state.manual_override = Some(format!("resume: {}", reason));
        self.state.updated_at = now;
        self.apply_policy();
        warn!(
            "Manual resume HALTED -> CRITICAL at {:.2}% drawdown: {}",
            dd, reason
        );

        let mut alerts = Vec::new();
        if let Some(a) = self.emit(
            AlertType::ManualOverride,
            AlertSeverity::Warning,
            format!("Trading manually resumed in CRITICAL: {}", reason),
            dd,
            self.cfg.halt_pct,
            now,
        ) {
            alerts.push(a);
        }

        Ok(EquityUpdate {
            state: self.state.clone(),
            transition: Some(TierTransition {
                from: RiskTier::Halted,
                to: RiskTier::Critical,
                drawdown_pct: dd,
                at: now,
            }),
            alerts,
        })
    }

    // --- Internal methods ---

    fn apply_policy(&mut self) {
        let s = &mut self.state;
        match s.tier {
            RiskTier::Normal => {
                s.position_size_multiplier = 1.0;
                s.min_confidence = self.base_min_confidence;
                s.trading_paused = false;
                s.emergency_exit = false;
                s.tighten_stops = false;
            }
            RiskTier::Warning => {
                s.position_size_multiplier = self.cfg.warning_multiplier;
                s.min_confidence = self.cfg.warning_min_confidence;
                s.trading_paused = false;
                s.emergency_exit = false;
                s.tighten_stops = false;
            }
            RiskTier::Critical => {
                s.position_size_multiplier = self.cfg.critical_multiplier;
                s.min_confidence = self.cfg.critical_min_confidence;
                s.trading_paused = false;
                s.emergency_exit = false;
                s.tighten_stops = true;
            }
            RiskTier::Halted => {
                s.position_size_multiplier = 0.0;
                s.min_confidence = 1.0;
                s.trading_paused = true;
                s.emergency_exit = true;
                s.tighten_stops = true;
            }
        }
    }

    fn push_history(&mut self, point: EquityPoint) {
        self.history.push_back(point);
        while self.history.len() > self.cfg.history_limit.max(1) {
            self.history.pop_front();
        }
    }

    fn log_transition(&self, t: &TierTransition) {
        if t.to > t.from {
            warn!(
                "Risk tier {} -> {} at {:.2}% drawdown (peak {:.2})",
                t.from, t.to, t.drawdown_pct, self.state.peak_equity
            );
        } else {
            info!(
                "Risk tier {} -> {} at {:.2}% drawdown",
                t.from, t.to, t.drawdown_pct
            );
        }
    }

    fn transition_alert(&mut self, t: &TierTransition) -> Option<Alert> {
        let (alert_type, severity, threshold) = match t.to {
            RiskTier::Warning => (
                AlertType::DrawdownWarning,
                AlertSeverity::Warning,
                self.cfg.warning_pct,
            ),
            RiskTier::Critical => (
                AlertType::DrawdownCritical,
                AlertSeverity::Critical,
                self.cfg.critical_pct,
            ),
            RiskTier::Halted => (
                AlertType::TradingHalted,
                AlertSeverity::Critical,
                self.cfg.halt_pct,
            ),
            RiskTier::Normal => (
                AlertType::Recovered,
                AlertSeverity::Info,
                self.cfg.recovery_pct,
            ),
        };
        let message = format!(
            "Risk tier {} -> {} at {:.2}% drawdown",
            t.from, t.to, t.drawdown_pct
        );
        self.emit(alert_type, severity, message, t.drawdown_pct, threshold, t.at)
    }

    /// Build an alert unless one of the same type went out within the dedup window.
    fn emit(
        &mut self,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        current_value: f64,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let window = Duration::seconds(self.cfg.alert_dedup_secs);
        if let Some(last) = self.last_alert.get(&alert_type) {
            if now - *last < window {
                return None;
            }
        }
        self.last_alert.insert(alert_type, now);
        Some(Alert {
            alert_type,
            severity,
            message,
            current_value,
            threshold,
            timestamp: now,
        })
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
