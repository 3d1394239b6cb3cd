use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::clock::SharedClock;
use crate::config::AlertConfig;
use crate::strategies::signals::ApprovedTrade;
use crate::trading::delivery::{DeliveryQueue, DeliveryRecord};

/// Receives approved trades. Order placement lives behind this trait.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn execute(&self, trade: &ApprovedTrade) -> anyhow::Result<()>;

    fn name(&self) -> &str;
}

#[derive(Debug, Default)]
pub struct LogExecutionSink;

#[async_trait]
impl ExecutionSink for LogExecutionSink {
    async fn execute(&self, trade: &ApprovedTrade) -> anyhow::Result<()> {
        info!("{}", "=".repeat(60));
        info!("APPROVED {} {}", trade.direction, trade.symbol);
        info!("  Entry: ${:.2}", trade.entry_price);
        info!(
            "  Stop Loss: ${:.2} [{}]",
            trade.stop_loss, trade.levels.stop_loss.method
        );
        info!(
            "  Take Profit: ${:.2} [{}]",
            trade.take_profit, trade.levels.take_profit.method
        );
        for p in &trade.levels.take_profit.partials {
            info!(
                "    ${:.2} weight {:.0}% (RR {:.2})",
                p.price,
                p.weight * 100.0,
                p.risk_reward
            );
        }
        info!("  Size: {:.6} (max risk ${:.2})", trade.position_size, trade.levels.max_risk_amount);
        info!("  Confidence: {:.1}%", trade.confidence * 100.0);
        info!(
            "  Ledger: record #{} hash {}{}",
            trade.ledger_record_id,
            &trade.snapshot_hash[..trade.snapshot_hash.len().min(16)],
            if trade.sealed { " (sealed)" } else { "" }
        );
        info!("{}", "=".repeat(60));
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

pub type ExecutionDelivery = DeliveryRecord<ApprovedTrade>;

/// Fire-and-forget hand-off of approved trades to an `ExecutionSink`.
pub struct ExecutionDispatcher {
    queue: DeliveryQueue<ApprovedTrade>,
}

impl ExecutionDispatcher {
    pub fn spawn(sink: Arc<dyn ExecutionSink>, cfg: &AlertConfig, clock: SharedClock) -> Self {
        info!("Execution dispatcher started: sink={}", sink.name());
        let queue = DeliveryQueue::spawn(
            "approved trade",
            cfg,
            clock,
            move |trade: ApprovedTrade| {
                let sink = sink.clone();
                async move { sink.execute(&trade).await }
            },
        );
        Self { queue }
    }

    pub async fn submit(&self, trade: ApprovedTrade) {
        self.queue.enqueue(trade).await;
    }

    pub async fn history(&self) -> Vec<ExecutionDelivery> {
        self.queue.history().await
    }

    pub async fn shutdown(self) -> Vec<ExecutionDelivery> {
        self.queue.shutdown().await
    }
}
