pub mod replay;

pub use replay::{FeedFrame, FeedSnapshot, ReplayFeed};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of pre-computed indicator snapshots, prices and account equity.
#[async_trait]
pub trait IndicatorFeed: Send + Sync {
    /// Move to the next observation. Returns false once the feed is exhausted.
    async fn advance(&mut self) -> Result<bool>;
    async fn latest_snapshot(&mut self, symbol: &str) -> Result<Option<FeedSnapshot>>;
    async fn current_price(&mut self, symbol: &str) -> Result<Option<f64>>;
    async fn current_equity(&mut self) -> Result<Option<f64>>;

    /// Recorded time of the current observation, for feeds that replay history.
    fn frame_time(&self) -> Option<DateTime<Utc>> {
        None
    }
}
