use serde::{Deserialize, Serialize};

use crate::error::RiskError;

/// Per-account ceilings. All percentages are of account equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_risk_per_trade_pct: f64,
    pub max_position_size_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_weekly_loss_pct: f64,
    pub max_monthly_loss_pct: f64,
    pub max_consecutive_losses: u32,
    /// New trades stop once drawdown reaches this level.
    pub stop_trading_drawdown_pct: f64,
    /// Drawdown at which open positions should be flattened.
    pub emergency_stop_drawdown_pct: f64,
    /// Signals an account may push through the gate per rolling hour.
    pub max_signals_per_hour: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_risk_per_trade_pct: 1.0,
            max_position_size_pct: 10.0,
            max_daily_loss_pct: 3.0,
            max_weekly_loss_pct: 6.0,
            max_monthly_loss_pct: 10.0,
            max_consecutive_losses: 5,
            stop_trading_drawdown_pct: 6.0,
            emergency_stop_drawdown_pct: 10.0,
            max_signals_per_hour: 20,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), RiskError> {
        let pcts = [
            ("max_risk_per_trade_pct", self.max_risk_per_trade_pct),
            ("max_position_size_pct", self.max_position_size_pct),
            ("max_daily_loss_pct", self.max_daily_loss_pct),
            ("max_weekly_loss_pct", self.max_weekly_loss_pct),
            ("max_monthly_loss_pct", self.max_monthly_loss_pct),
            ("stop_trading_drawdown_pct", self.stop_trading_drawdown_pct),
            ("emergency_stop_drawdown_pct", self.emergency_stop_drawdown_pct),
        ];
        for (name, v) in pcts {
            if !(v > 0.0 && v <= 100.0) {
                return Err(RiskError::InvalidLimits(format!(
                    "{} must be in (0, 100], got {}",
                    name, v
                )));
            }
        }
        if self.max_risk_per_trade_pct > self.max_position_size_pct {
            return Err(RiskError::InvalidLimits(
                "max_risk_per_trade_pct cannot exceed max_position_size_pct".to_string(),
            ));
        }
        if self.max_daily_loss_pct > self.max_weekly_loss_pct
            || self.max_weekly_loss_pct > self.max_monthly_loss_pct
        {
            return Err(RiskError::InvalidLimits(
                "loss limits must satisfy daily <= weekly <= monthly".to_string(),
            ));
        }
        if self.stop_trading_drawdown_pct > self.emergency_stop_drawdown_pct {
            return Err(RiskError::InvalidLimits(
                "stop-trading drawdown must not exceed emergency-stop drawdown".to_string(),
            ));
        }
        if self.max_consecutive_losses == 0 || self.max_signals_per_hour == 0 {
            return Err(RiskError::InvalidLimits(
                "counters must allow at least one event".to_string(),
            ));
        }
        Ok(())
    }
}
