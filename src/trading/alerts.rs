use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clock::SharedClock;
use crate::config::AlertConfig;
use crate::models::{Alert, AlertSeverity};
use crate::trading::delivery::{DeliveryQueue, DeliveryRecord};

/// Notification transport. Delivery is best-effort.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;

    fn name(&self) -> &str;
}

/// Writes alerts to the log at a level matching their severity.
#[derive(Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        match alert.severity {
            AlertSeverity::Info => info!("ALERT {}", alert),
            AlertSeverity::Warning => warn!("ALERT {}", alert),
            AlertSeverity::Critical => error!("ALERT {}", alert),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

pub type AlertDelivery = DeliveryRecord<Alert>;

pub struct AlertDispatcher {
    queue: DeliveryQueue<Alert>,
}

impl AlertDispatcher {
    pub fn spawn(sink: Arc<dyn AlertSink>, cfg: &AlertConfig, clock: SharedClock) -> Self {
        info!(
            "Alert dispatcher started: sink={}, capacity={}, retries={}",
            sink.name(),
            cfg.channel_capacity,
            cfg.max_retries
        );
        let queue = DeliveryQueue::spawn(
            "alert",
            cfg,
            clock,
            move |alert: Alert| {
                let sink = sink.clone();
                async move { sink.deliver(&alert).await }
            },
        );
        Self { queue }
    }

    pub async fn dispatch(&self, alert: Alert) {
        self.queue.enqueue(alert).await;
    }

    pub async fn dispatch_all(&self, alerts: Vec<Alert>) {
        for alert in alerts {
            self.dispatch(alert).await;
        }
    }

    pub async fn history(&self) -> Vec<AlertDelivery> {
        self.queue.history().await
    }

    pub async fn shutdown(self) -> Vec<AlertDelivery> {
        self.queue.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::AlertType;
    use crate::test_helpers::base_time;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySink {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl AlertSink for FlakySink {
        async fn deliver(&self, _alert: &Alert) -> anyhow::Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                anyhow::bail!("transport down");
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn alert() -> Alert {
        Alert {
            alert_type: AlertType::DrawdownWarning,
            severity: AlertSeverity::Warning,
            message: "drawdown 3.00%".to_string(),
            current_value: 3.0,
            threshold: 3.0,
            timestamp: base_time(),
        }
    }

    fn cfg() -> AlertConfig {
        AlertConfig {
            channel_capacity: 8,
            max_retries: 2,
            base_backoff_ms: 1,
            timeout_ms: 100,
            history_limit: 100,
        }
    }

    fn clock() -> SharedClock {
        Arc::new(ManualClock::new(base_time()))
    }

    #[tokio::test]
    async fn retries_then_delivers() {
        let sink = Arc::new(FlakySink {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let d = AlertDispatcher::spawn(sink, &cfg(), clock());
        d.dispatch(alert()).await;
        let history = d.shutdown().await;
        assert_eq!(history.len(), 1);
        assert!(history[0].delivered);
        assert_eq!(history[0].attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_are_recorded() {
        let sink = Arc::new(FlakySink {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let d = AlertDispatcher::spawn(sink, &cfg(), clock());
        d.dispatch_all(vec![alert(), alert()]).await;
        let history = d.shutdown().await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|h| !h.delivered && h.attempts == 3));
    }

    #[tokio::test]
    async fn log_sink_always_delivers() {
        let d = AlertDispatcher::spawn(Arc::new(LogAlertSink), &cfg(), clock());
        d.dispatch(alert()).await;
        assert!(d.shutdown().await[0].delivered);
    }
}
