use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::ConfigError;
use crate::models::Market;
use crate::risk::limits::RiskLimits;

pub type SharedConfig = Arc<RwLock<Config>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketThresholds {
    /// Volatility (% of price) above which the market is considered unsuitable.
    pub max_volatility_pct: f64,
    pub confidence_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub min_confidence: f64,
    pub min_risk_reward: f64,
    pub max_risk_reward: f64,
    pub min_adx: f64,
    /// Winning tally must reach this share of the maximum score.
    pub min_score_ratio: f64,
    /// Winning tally must beat the losing one by strictly more than this.
    pub score_margin: f64,
    pub use_multi_timeframe: bool,
    pub min_alignment: f64,
    pub use_patterns: bool,
    pub atr_stop_multiple: f64,
    pub atr_target_multiple: f64,
    pub markets: HashMap<Market, MarketThresholds>,
}

impl ScorerConfig {
    pub fn thresholds(&self, market: Market) -> MarketThresholds {
        self.markets
            .get(&market)
            .cloned()
            .unwrap_or(MarketThresholds {
                max_volatility_pct: 5.0,
                confidence_multiplier: 1.0,
            })
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        let mut markets = HashMap::new();
        markets.insert(
            Market::Crypto,
            MarketThresholds {
                max_volatility_pct: 8.0,
                confidence_multiplier: 0.95,
            },
        );
        markets.insert(
            Market::Forex,
            MarketThresholds {
                max_volatility_pct: 2.0,
                confidence_multiplier: 1.0,
            },
        );
        markets.insert(
            Market::Stocks,
            MarketThresholds {
                max_volatility_pct: 5.0,
                confidence_multiplier: 1.0,
            },
        );
        markets.insert(
            Market::Commodities,
            MarketThresholds {
                max_volatility_pct: 4.0,
                confidence_multiplier: 0.97,
            },
        );

        Self {
            min_confidence: 0.65,
            min_risk_reward: 1.5,
            max_risk_reward: 5.0,
            min_adx: 25.0,
            min_score_ratio: 0.6,
            score_margin: 1.0,
            use_multi_timeframe: true,
            min_alignment: 0.6,
            use_patterns: true,
            atr_stop_multiple: 1.5,
            atr_target_multiple: 3.0,
            markets,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownConfig {
    pub warning_pct: f64,
    pub critical_pct: f64,
    pub halt_pct: f64,
    pub recovery_pct: f64,
    pub warning_multiplier: f64,
    pub warning_min_confidence: f64,
    pub critical_multiplier: f64,
    pub critical_min_confidence: f64,
    pub alert_dedup_secs: i64,
    pub history_limit: usize,
}

impl Default for DrawdownConfig {
    fn default() -> Self {
        Self {
            warning_pct: 3.0,
            critical_pct: 4.5,
            halt_pct: 6.0,
            recovery_pct: 1.0,
            warning_multiplier: 0.8,
            warning_min_confidence: 0.85,
            critical_multiplier: 0.6,
            critical_min_confidence: 0.90,
            alert_dedup_secs: 300,
            history_limit: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SltpConfig {
    pub atr_period: usize,
    pub swing_lookback: usize,
    pub atr_stop_multiple: f64,
    /// Structural levels further than this from price are ignored.
    pub structure_max_distance_pct: f64,
    /// Structural stops sit this many ATRs beyond the level.
    pub structure_buffer_atr: f64,
    pub min_risk_reward: f64,
    pub max_risk_reward: f64,
    pub fib_ladder: Vec<f64>,
    pub partial_targets: bool,
    pub partial_weights: Vec<f64>,
    pub max_position_size_pct: f64,
    pub trailing_atr_multiple: f64,
    pub target_win_rate: f64,
    pub optimization_min_trades: usize,
    pub rr_step: f64,
    pub rr_floor: f64,
    pub rr_ceiling: f64,
    pub size_step: f64,
    pub min_position_size_pct: f64,
    pub low_liquidity_factor: f64,
}

impl Default for SltpConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            swing_lookback: 3,
            atr_stop_multiple: 1.5,
            structure_max_distance_pct: 5.0,
            structure_buffer_atr: 0.25,
            min_risk_reward: 1.5,
            max_risk_reward: 6.0,
            fib_ladder: vec![1.0, 1.618, 2.618],
            partial_targets: true,
            partial_weights: vec![0.5, 0.3, 0.2],
            max_position_size_pct: 10.0,
            trailing_atr_multiple: 2.0,
            target_win_rate: 0.5,
            optimization_min_trades: 10,
            rr_step: 0.25,
            rr_floor: 1.0,
            rr_ceiling: 4.0,
            size_step: 0.1,
            min_position_size_pct: 2.0,
            low_liquidity_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub batch_size: usize,
    /// Required count of leading zero hex digits in a block hash.
    pub difficulty: usize,
    pub grace_window_secs: i64,
    pub signing_key: String,
    pub export_path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            difficulty: 2,
            grace_window_secs: 60,
            signing_key: "trade-sentinel".to_string(),
            export_path: "data/ledger.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub channel_capacity: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub timeout_ms: u64,
    /// Delivery records kept per dispatcher; oldest are dropped first.
    pub history_limit: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            max_retries: 3,
            base_backoff_ms: 500,
            timeout_ms: 5_000,
            history_limit: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub scan_interval_secs: i64,
    pub equity_interval_secs: i64,
    pub trailing_interval_secs: i64,
    pub seal_interval_secs: i64,
    pub stale_after_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            equity_interval_secs: 10,
            trailing_interval_secs: 5,
            seal_interval_secs: 60,
            stale_after_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub account_id: String,
    pub symbols: Vec<String>,
    pub initial_equity: f64,

    pub scorer: ScorerConfig,
    pub drawdown: DrawdownConfig,
    pub limits: RiskLimits,
    pub sltp: SltpConfig,
    pub ledger: LedgerConfig,
    pub alerts: AlertConfig,
    pub scheduler: SchedulerConfig,

    // Collaborators
    pub feed_file: String,

    // State & logging
    pub data_dir: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account_id: "default".to_string(),
            symbols: vec!["BTC-USD".to_string()],
            initial_equity: 100_000.0,
            scorer: ScorerConfig::default(),
            drawdown: DrawdownConfig::default(),
            limits: RiskLimits::default(),
            sltp: SltpConfig::default(),
            ledger: LedgerConfig::default(),
            alerts: AlertConfig::default(),
            scheduler: SchedulerConfig::default(),
            feed_file: "data/feed.json".to_string(),
            data_dir: "data".to_string(),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let mut cfg = Config::default();

        cfg.account_id = env("ACCOUNT_ID", &cfg.account_id);
        let symbols = env("SYMBOLS", "BTC-USD");
        cfg.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        cfg.initial_equity = env("INITIAL_EQUITY", "100000").parse().unwrap_or(100_000.0);

        cfg.scorer.min_confidence = env("MIN_CONFIDENCE", "0.65").parse().unwrap_or(0.65);
        cfg.scorer.min_risk_reward = env("MIN_RISK_REWARD", "1.5").parse().unwrap_or(1.5);
        cfg.scorer.max_risk_reward = env("MAX_RISK_REWARD", "5.0").parse().unwrap_or(5.0);
        cfg.scorer.min_alignment = env("MIN_ALIGNMENT", "0.6").parse().unwrap_or(0.6);
        cfg.scorer.use_multi_timeframe =
            env("USE_MULTI_TIMEFRAME", "true").to_lowercase() == "true";
        cfg.scorer.use_patterns = env("USE_PATTERNS", "true").to_lowercase() == "true";
        cfg.sltp.min_risk_reward = cfg.scorer.min_risk_reward;

        cfg.drawdown.warning_pct = env("DRAWDOWN_WARNING_PCT", "3.0").parse().unwrap_or(3.0);
        cfg.drawdown.critical_pct = env("DRAWDOWN_CRITICAL_PCT", "4.5").parse().unwrap_or(4.5);
        cfg.drawdown.halt_pct = env("DRAWDOWN_HALT_PCT", "6.0").parse().unwrap_or(6.0);
        cfg.drawdown.recovery_pct = env("DRAWDOWN_RECOVERY_PCT", "1.0").parse().unwrap_or(1.0);

        cfg.limits.max_risk_per_trade_pct =
            env("MAX_RISK_PER_TRADE_PCT", "1.0").parse().unwrap_or(1.0);
        cfg.limits.max_position_size_pct =
            env("MAX_POSITION_SIZE_PCT", "10.0").parse().unwrap_or(10.0);
        cfg.limits.max_daily_loss_pct = env("MAX_DAILY_LOSS_PCT", "3.0").parse().unwrap_or(3.0);
        cfg.limits.max_consecutive_losses =
            env("MAX_CONSECUTIVE_LOSSES", "5").parse().unwrap_or(5);
        cfg.sltp.max_position_size_pct = cfg.limits.max_position_size_pct;

        cfg.sltp.trailing_atr_multiple =
            env("TRAILING_ATR_MULTIPLE", "2.0").parse().unwrap_or(2.0);
        let ladder = env("FIB_LADDER", "1.0,1.618,2.618");
        let parsed: Vec<f64> = ladder
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        if !parsed.is_empty() {
            cfg.sltp.fib_ladder = parsed;
        }

        cfg.alerts.history_limit =
            env("DELIVERY_HISTORY_LIMIT", "1000").parse().unwrap_or(1_000);

        cfg.ledger.batch_size = env("LEDGER_BATCH_SIZE", "10").parse().unwrap_or(10);
        cfg.ledger.difficulty = env("LEDGER_DIFFICULTY", "2").parse().unwrap_or(2);
        cfg.ledger.signing_key = env("LEDGER_SIGNING_KEY", &cfg.ledger.signing_key);

        cfg.data_dir = env("DATA_DIR", "data");
        cfg.ledger.export_path = format!("{}/ledger.json", cfg.data_dir);
        cfg.feed_file = env("FEED_FILE", &format!("{}/feed.json", cfg.data_dir));
        cfg.log_level = env("LOG_LEVEL", "INFO");

        cfg
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if !(0.0..=1.0).contains(&self.scorer.min_confidence) {
            return Err(invalid("MIN_CONFIDENCE", "must be within [0, 1]"));
        }
        if self.scorer.min_risk_reward <= 0.0
            || self.scorer.min_risk_reward > self.scorer.max_risk_reward
        {
            return Err(invalid("MIN_RISK_REWARD", "must be positive and <= MAX_RISK_REWARD"));
        }
        let d = &self.drawdown;
        if !(d.recovery_pct < d.warning_pct
            && d.warning_pct < d.critical_pct
            && d.critical_pct < d.halt_pct)
        {
            return Err(invalid(
                "DRAWDOWN_*_PCT",
                "tiers must increase: recovery < warning < critical < halt",
            ));
        }
        if self.ledger.batch_size == 0 {
            return Err(invalid("LEDGER_BATCH_SIZE", "must be at least 1"));
        }
        if self.ledger.difficulty > 64 {
            return Err(invalid("LEDGER_DIFFICULTY", "cannot exceed hash length"));
        }
        if self.sltp.fib_ladder.iter().any(|r| *r <= 0.0) {
            return Err(invalid("FIB_LADDER", "ratios must be positive"));
        }
        if self.initial_equity <= 0.0 {
            return Err(invalid("INITIAL_EQUITY", "must be positive"));
        }
        self.limits
            .validate()
            .map_err(|e| invalid("RISK_LIMITS", &e.to_string()))?;
        Ok(())
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::default_test_config;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
        assert!(default_test_config().validate().is_ok());
    }

    #[test]
    fn rejects_unordered_tiers() {
        let mut cfg = Config::default();
        cfg.drawdown.critical_pct = 2.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_batch() {
        let mut cfg = Config::default();
        cfg.ledger.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_market_falls_back_to_neutral_thresholds() {
        let mut scorer = ScorerConfig::default();
        scorer.markets.clear();
        let t = scorer.thresholds(Market::Forex);
        assert!((t.confidence_multiplier - 1.0).abs() < 1e-9);
    }
}
