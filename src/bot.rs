use anyhow::Result;
use chrono::Duration;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use trade_sentinel::clock::{Clock, ManualClock, SystemClock};
use trade_sentinel::config::SharedConfig;
use trade_sentinel::feed::IndicatorFeed;
use trade_sentinel::scheduler::{Scheduler, Task};
use trade_sentinel::trading::{Pipeline, ProcessOutcome};

const TICK_INTERVAL_MS: u64 = 1000;

pub struct Sentinel {
    config: SharedConfig,
    feed: Box<dyn IndicatorFeed>,
    pipeline: Pipeline,
    scheduler: Scheduler,
    wall_clock: SystemClock,
    /// Pipeline clock, moved to each frame's recorded time when replaying.
    replay_clock: Option<Arc<ManualClock>>,
    feed_exhausted: bool,
}

impl Sentinel {
    pub async fn new(
        config: SharedConfig,
        feed: Box<dyn IndicatorFeed>,
        pipeline: Pipeline,
        replay_clock: Option<Arc<ManualClock>>,
    ) -> Self {
        let cfg = config.read().await;

        info!("{}", "=".repeat(60));
        info!("Trade sentinel starting up");
        info!("Account: {}", cfg.account_id);
        info!("Symbols: {}", cfg.symbols.join(", "));
        info!("Initial equity: ${:.2}", cfg.initial_equity);
        info!(
            "Drawdown tiers: warning {:.1}% / critical {:.1}% / halt {:.1}%",
            cfg.drawdown.warning_pct, cfg.drawdown.critical_pct, cfg.drawdown.halt_pct
        );
        info!(
            "Ledger: batch {} difficulty {}",
            cfg.ledger.batch_size, cfg.ledger.difficulty
        );
        info!("{}", "=".repeat(60));

        let s = &cfg.scheduler;
        let scheduler = Scheduler::new()
            .every(Task::SignalScan, Duration::seconds(s.scan_interval_secs))
            .every(Task::EquityCheck, Duration::seconds(s.equity_interval_secs))
            .every(Task::TrailingUpdate, Duration::seconds(s.trailing_interval_secs))
            .every(Task::BlockSeal, Duration::seconds(s.seal_interval_secs));

        drop(cfg);

        Self {
            config,
            feed,
            pipeline,
            scheduler,
            wall_clock: SystemClock,
            replay_clock,
            feed_exhausted: false,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Sentinel is now running. Press Ctrl+C to stop.");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    break;
                }
                _ = self.tick() => {
                    if self.feed_exhausted {
                        info!("Feed exhausted");
                        break;
                    }
                }
            }
        }

        self.shutdown().await
    }

    async fn tick(&mut self) {
        let now = self.wall_clock.now();
        for task in self.scheduler.due(now) {
            match task {
                Task::SignalScan => self.scan().await,
                Task::EquityCheck => self.check_equity().await,
                Task::TrailingUpdate => self.update_trailing().await,
                Task::BlockSeal => self.seal().await,
            }
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(TICK_INTERVAL_MS)).await;
    }

    async fn scan(&mut self) {
        match self.feed.advance().await {
            Ok(true) => {}
            Ok(false) => {
                self.feed_exhausted = true;
                return;
            }
            Err(e) => {
                error!("Feed error: {}", e);
                return;
            }
        }
        if let (Some(clock), Some(t)) = (&self.replay_clock, self.feed.frame_time()) {
            clock.set(t);
        }

        let symbols = self.config.read().await.symbols.clone();
        for symbol in symbols {
            let item = match self.feed.latest_snapshot(&symbol).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(e) => {
                    warn!("No snapshot for {}: {}", symbol, e);
                    continue;
                }
            };
            match self.pipeline.process(&item.snapshot, &item.context).await {
                Ok(ProcessOutcome::NoSignal(reason)) => {
                    info!("{}: no signal ({})", symbol, reason);
                }
                Ok(ProcessOutcome::Rejected { signal_id, reason }) => {
                    info!("{} rejected: {}", signal_id, reason);
                }
                Ok(_) => {}
                Err(e) => error!("Pipeline error for {}: {}", symbol, e),
            }
        }
    }

    async fn check_equity(&mut self) {
        match self.feed.current_equity().await {
            Ok(Some(equity)) => {
                if let Err(e) = self.pipeline.update_equity(equity).await {
                    error!("Equity update failed: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => error!("Equity check error: {}", e),
        }
    }

    async fn update_trailing(&mut self) {
        let symbols: Vec<String> = self
            .pipeline
            .open_trades()
            .await
            .into_iter()
            .map(|t| t.symbol)
            .collect();
        for symbol in symbols {
            let price = match self.feed.current_price(&symbol).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    error!("Price check error for {}: {}", symbol, e);
                    continue;
                }
            };
            if let Err(e) = self.pipeline.on_price_tick(&symbol, price).await {
                error!("Trailing update failed for {}: {}", symbol, e);
            }
        }
    }

    async fn seal(&mut self) {
        if let Err(e) = self.pipeline.seal().await {
            error!("Block seal failed: {}", e);
        }
        let v = self.pipeline.verify_ledger().await;
        if !v.is_valid {
            error!("Ledger verification failed: {}", v.message);
        }
    }

    async fn shutdown(self) -> Result<()> {
        info!("Shutting down...");
        let export_path = self.config.read().await.ledger.export_path.clone();
        if let Err(e) = self.pipeline.export_ledger(Path::new(&export_path)).await {
            error!("Ledger export failed: {}", e);
        }

        let state = self.pipeline.drawdown_state().await;
        let open = self.pipeline.open_trades().await.len();
        info!("{}", "=".repeat(60));
        info!("Final status");
        info!(
            "  Tier: {} | Drawdown: {:.2}% (max {:.2}%)",
            state.tier, state.current_drawdown_pct, state.max_drawdown_pct
        );
        info!("  Equity: ${:.2} (peak ${:.2})", state.last_equity, state.peak_equity);
        info!("  Open trades: {}", open);

        let (alerts, executions) = self.pipeline.shutdown().await;
        let failed = alerts.iter().filter(|a| !a.delivered).count();
        info!(
            "  Alerts: {} ({} failed) | Executions: {}",
            alerts.len(),
            failed,
            executions.len()
        );
        info!("{}", "=".repeat(60));
        Ok(())
    }
}
