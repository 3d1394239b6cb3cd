use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::feed::IndicatorFeed;
use crate::models::{IndicatorSnapshot, MarketContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSnapshot {
    pub snapshot: IndicatorSnapshot,
    pub context: MarketContext,
}

/// One recorded observation: snapshots, prices and equity at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedFrame {
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub equity: Option<f64>,
    #[serde(default)]
    pub prices: HashMap<String, f64>,
    #[serde(default)]
    pub snapshots: Vec<FeedSnapshot>,
}

/// An IndicatorFeed that replays recorded frames in timestamp order.
/// Nothing is visible until the first `advance`.
pub struct ReplayFeed {
    frames: Vec<FeedFrame>,
    cursor: Option<usize>,
}

impl ReplayFeed {
    pub fn new(mut frames: Vec<FeedFrame>) -> Self {
        frames.sort_by_key(|f| f.at);
        Self {
            frames,
            cursor: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let frames: Vec<FeedFrame> =
            serde_json::from_str(json).context("Failed to parse feed frames")?;
        Ok(Self::new(frames))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read feed file {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn current(&self) -> Option<&FeedFrame> {
        self.cursor.and_then(|i| self.frames.get(i))
    }

    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        self.current().map(|f| f.at)
    }

    /// Symbols with a snapshot in the current frame.
    pub fn symbols(&self) -> Vec<String> {
        self.current()
            .map(|f| f.snapshots.iter().map(|s| s.snapshot.symbol.clone()).collect())
            .unwrap_or_default()
    }

    /// Last known value up to and including the current frame, so a frame
    /// without a price or equity reading keeps the previous one.
    fn last_known<T>(&self, pick: impl Fn(&FeedFrame) -> Option<T>) -> Option<T> {
        let end = self.cursor?;
        self.frames[..=end].iter().rev().find_map(pick)
    }
}

#[async_trait]
impl IndicatorFeed for ReplayFeed {
    async fn advance(&mut self) -> Result<bool> {
        let next = self.cursor.map_or(0, |i| i + 1);
        if next >= self.frames.len() {
            return Ok(false);
        }
        self.cursor = Some(next);
        Ok(true)
    }

    async fn latest_snapshot(&mut self, symbol: &str) -> Result<Option<FeedSnapshot>> {
        Ok(self
            .current()
            .and_then(|f| f.snapshots.iter().find(|s| s.snapshot.symbol == symbol))
            .cloned())
    }

    async fn current_price(&mut self, symbol: &str) -> Result<Option<f64>> {
        Ok(self.last_known(|f| {
            f.prices.get(symbol).copied().or_else(|| {
                f.snapshots
                    .iter()
                    .find(|s| s.snapshot.symbol == symbol)
                    .map(|s| s.context.price)
            })
        }))
    }

    async fn current_equity(&mut self) -> Result<Option<f64>> {
        Ok(self.last_known(|f| f.equity))
    }

    fn frame_time(&self) -> Option<DateTime<Utc>> {
        self.current_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{base_time, bullish_snapshot, market_context};
    use chrono::Duration;

    fn frames() -> Vec<FeedFrame> {
        let s = bullish_snapshot("BTC-USD", base_time());
        let ctx = market_context(&s);
        vec![
            FeedFrame {
                at: base_time() + Duration::minutes(1),
                equity: None,
                prices: HashMap::from([("BTC-USD".to_string(), 101.0)]),
                snapshots: Vec::new(),
            },
            FeedFrame {
                at: base_time(),
                equity: Some(100_000.0),
                prices: HashMap::new(),
                snapshots: vec![FeedSnapshot {
                    snapshot: s,
                    context: ctx,
                }],
            },
        ]
    }

    #[tokio::test]
    async fn replays_in_time_order() {
        let mut feed = ReplayFeed::new(frames());
        assert!(feed.latest_snapshot("BTC-USD").await.unwrap().is_none());

        assert!(feed.advance().await.unwrap());
        assert_eq!(feed.current_time(), Some(base_time()));
        assert!(feed.latest_snapshot("BTC-USD").await.unwrap().is_some());
        assert_eq!(feed.current_price("BTC-USD").await.unwrap(), Some(100.0));

        assert!(feed.advance().await.unwrap());
        assert_eq!(feed.current_price("BTC-USD").await.unwrap(), Some(101.0));
        // Equity carries forward from the earlier frame.
        assert_eq!(feed.current_equity().await.unwrap(), Some(100_000.0));
        assert!(feed.symbols().is_empty());

        assert!(!feed.advance().await.unwrap());
    }

    #[test]
    fn json_round_trip_and_bad_input() {
        let json = serde_json::to_string(&frames()).unwrap();
        let feed = ReplayFeed::from_json(&json).unwrap();
        assert_eq!(feed.len(), 2);
        assert!(ReplayFeed::from_json("{not json").is_err());
        assert!(ReplayFeed::from_file(Path::new("/nonexistent/feed.json")).is_err());
    }
}
