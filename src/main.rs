mod bot;

use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use trade_sentinel::clock::ManualClock;
use trade_sentinel::config::Config;
use trade_sentinel::feed::ReplayFeed;
use trade_sentinel::trading::alerts::LogAlertSink;
use trade_sentinel::trading::execution::LogExecutionSink;
use trade_sentinel::trading::Pipeline;

use crate::bot::Sentinel;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    cfg.validate()?;

    let feed = Box::new(ReplayFeed::from_file(Path::new(&cfg.feed_file))?);
    let replay_clock = Arc::new(ManualClock::new(Utc::now()));
    let pipeline = Pipeline::new(
        cfg.clone(),
        replay_clock.clone(),
        Arc::new(LogAlertSink),
        Arc::new(LogExecutionSink),
    );
    let shared_config = cfg.shared();

    let bot = Sentinel::new(shared_config, feed, pipeline, Some(replay_clock)).await;
    bot.run().await?;

    Ok(())
}
