use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::Direction;
use crate::strategies::scorer::HistoricalStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Breakeven,
}

impl Outcome {
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > 0.0 {
            Outcome::Win
        } else if pnl < 0.0 {
            Outcome::Loss
        } else {
            Outcome::Breakeven
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub trade_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub position_size: f64,
    pub pnl: f64,
    /// Realised move in units of the initial stop distance.
    #[serde(default)]
    pub r_multiple: f64,
    pub outcome: Outcome,
    pub confidence: f64,
    #[serde(default)]
    pub pattern: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl ClosedTrade {
    pub fn hold_duration_secs(&self) -> i64 {
        (self.closed_at - self.opened_at).num_seconds()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub key: String,
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_pnl: f64,
    pub total_pnl: f64,
    pub payoff_ratio: f64,
    pub edge: f64,
    /// Mean R-multiple of winning trades; zero without wins.
    pub avg_win_r: f64,
}

/// Rolling per-symbol window of closed trades. Feeds the scorer's historical
/// success ratio and the SL/TP optimiser's win rate.
pub struct PerformanceTracker {
    window: usize,
    trades: HashMap<String, VecDeque<ClosedTrade>>,
    state_file: Option<PathBuf>,
}

impl PerformanceTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            trades: HashMap::new(),
            state_file: None,
        }
    }

    /// Tracker persisted to `<data_dir>/performance.json`. Existing state is
    /// loaded when readable; a missing or corrupt file starts empty.
    pub fn persistent(window: usize, data_dir: &str) -> Self {
        let mut tracker = Self::new(window);
        tracker.state_file = Some(Path::new(data_dir).join("performance.json"));
        tracker.load_state();
        tracker
    }

    pub fn record(&mut self, trade: ClosedTrade) {
        debug!(
            "Performance {} {}: pnl {:+.2} ({:?})",
            trade.symbol, trade.trade_id, trade.pnl, trade.outcome
        );
        let window = self.window;
        let q = self.trades.entry(trade.symbol.clone()).or_default();
        q.push_back(trade);
        while q.len() > window {
            q.pop_front();
        }
        self.save_state();
    }

    pub fn trades(&self, symbol: &str) -> Vec<&ClosedTrade> {
        self.trades
            .get(symbol)
            .map(|q| q.iter().collect())
            .unwrap_or_default()
    }

    /// Decided trades (wins and losses) and the share that won.
    pub fn stats(&self, symbol: &str) -> Option<HistoricalStats> {
        let s = self.summary(symbol)?;
        let decided = s.wins + s.losses;
        if decided == 0 {
            return None;
        }
        Some(HistoricalStats {
            samples: decided,
            success_ratio: s.win_rate,
        })
    }

    pub fn summary(&self, symbol: &str) -> Option<PerformanceSummary> {
        let trades: Vec<&ClosedTrade> = self.trades.get(symbol)?.iter().collect();
        Some(summarize(symbol, &trades))
    }

    /// Per-pattern breakdown for one symbol; unpatterned trades go under "NONE".
    pub fn by_pattern(&self, symbol: &str) -> HashMap<String, PerformanceSummary> {
        let mut buckets: HashMap<String, Vec<&ClosedTrade>> = HashMap::new();
        for t in self.trades.get(symbol).into_iter().flatten() {
            let key = t.pattern.clone().unwrap_or_else(|| "NONE".to_string());
            buckets.entry(key).or_default().push(t);
        }
        buckets
            .into_iter()
            .map(|(k, trades)| {
                let s = summarize(&k, &trades);
                (k, s)
            })
            .collect()
    }

    fn save_state(&self) {
        let Some(path) = &self.state_file else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(&self.trades) {
            let _ = fs::write(path, json);
        }
    }

    fn load_state(&mut self) {
        let Some(path) = &self.state_file else {
            return;
        };
        if let Ok(content) = fs::read_to_string(path) {
            if let Ok(trades) =
                serde_json::from_str::<HashMap<String, VecDeque<ClosedTrade>>>(&content)
            {
                self.trades = trades;
            }
        }
    }
}

fn summarize(key: &str, trades: &[&ClosedTrade]) -> PerformanceSummary {
    let total = trades.len();
    let wins = trades.iter().filter(|t| t.outcome == Outcome::Win).count();
    let losses = trades.iter().filter(|t| t.outcome == Outcome::Loss).count();
    let decided = wins + losses;
    let win_rate = if decided > 0 {
        wins as f64 / decided as f64
    } else {
        0.0
    };

    let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
    let avg_pnl = if total > 0 { total_pnl / total as f64 } else { 0.0 };

    let avg_win = if wins > 0 {
        trades
            .iter()
            .filter(|t| t.outcome == Outcome::Win)
            .map(|t| t.pnl)
            .sum::<f64>()
            / wins as f64
    } else {
        0.0
    };
    let avg_loss = if losses > 0 {
        (trades
            .iter()
            .filter(|t| t.outcome == Outcome::Loss)
            .map(|t| t.pnl)
            .sum::<f64>()
            / losses as f64)
            .abs()
    } else {
        0.0
    };

    let avg_win_r = if wins > 0 {
        trades
            .iter()
            .filter(|t| t.outcome == Outcome::Win)
            .map(|t| t.r_multiple)
            .sum::<f64>()
            / wins as f64
    } else {
        0.0
    };

    let payoff_ratio = if avg_loss > 0.0 { avg_win / avg_loss } else { 0.0 };
    let edge = if decided > 0 {
        (win_rate * avg_win) - ((1.0 - win_rate) * avg_loss)
    } else {
        0.0
    };

    PerformanceSummary {
        key: key.to_string(),
        total,
        wins,
        losses,
        win_rate: round4(win_rate),
        avg_pnl: round4(avg_pnl),
        total_pnl: round4(total_pnl),
        payoff_ratio: round4(payoff_ratio),
        edge: round4(edge),
        avg_win_r: round4(avg_win_r),
    }
}

fn round4(x: f64) -> f64 {
    (x * 10000.0).round() / 10000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::base_time;

    fn closed(symbol: &str, pnl: f64, pattern: Option<&str>) -> ClosedTrade {
        ClosedTrade {
            trade_id: format!("T-{}", pnl),
            symbol: symbol.to_string(),
            direction: Direction::Buy,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            position_size: 1.0,
            pnl,
            r_multiple: pnl / 5.0,
            outcome: Outcome::from_pnl(pnl),
            confidence: 0.8,
            pattern: pattern.map(|p| p.to_string()),
            opened_at: base_time(),
            closed_at: base_time() + chrono::Duration::hours(2),
        }
    }

    #[test]
    fn summary_win_rate_and_edge() {
        let mut p = PerformanceTracker::new(100);
        for pnl in [10.0, 10.0, 10.0, -5.0] {
            p.record(closed("BTC-USD", pnl, None));
        }
        let s = p.summary("BTC-USD").unwrap();
        assert_eq!(s.wins, 3);
        assert_eq!(s.losses, 1);
        assert!((s.win_rate - 0.75).abs() < 1e-9);
        assert!((s.payoff_ratio - 2.0).abs() < 1e-9);
        // 0.75 * 10 - 0.25 * 5
        assert!((s.edge - 6.25).abs() < 1e-9);
        assert!((s.avg_win_r - 2.0).abs() < 1e-9);

        let h = p.stats("BTC-USD").unwrap();
        assert_eq!(h.samples, 4);
        assert!(p.stats("ETH-USD").is_none());
    }

    #[test]
    fn window_drops_oldest() {
        let mut p = PerformanceTracker::new(3);
        for pnl in [-1.0, 1.0, 1.0, 1.0] {
            p.record(closed("BTC-USD", pnl, None));
        }
        let s = p.summary("BTC-USD").unwrap();
        assert_eq!(s.total, 3);
        assert_eq!(s.losses, 0);
    }

    #[test]
    fn breakdown_by_pattern() {
        let mut p = PerformanceTracker::new(100);
        p.record(closed("BTC-USD", 5.0, Some("oversold_reversal")));
        p.record(closed("BTC-USD", -2.0, None));
        let b = p.by_pattern("BTC-USD");
        assert_eq!(b["oversold_reversal"].wins, 1);
        assert_eq!(b["NONE"].losses, 1);
        assert_eq!(p.trades("BTC-USD")[0].hold_duration_secs(), 7200);
    }

    #[test]
    fn persists_between_instances() {
        let dir = std::env::temp_dir().join(format!("sentinel-perf-{}", std::process::id()));
        let dir_str = dir.to_string_lossy().to_string();
        {
            let mut p = PerformanceTracker::persistent(100, &dir_str);
            p.record(closed("BTC-USD", 5.0, None));
        }
        let p = PerformanceTracker::persistent(100, &dir_str);
        assert_eq!(p.trades("BTC-USD").len(), 1);
        let _ = fs::remove_dir_all(&dir);
    }
}
