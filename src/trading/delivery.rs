use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::config::AlertConfig;

/// Timeout and exponential backoff for best-effort deliveries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &AlertConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_backoff: Duration::from_millis(cfg.base_backoff_ms),
            timeout: Duration::from_millis(cfg.timeout_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based): base * 2^attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.min(16))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub attempts: u32,
    pub delivered: bool,
    pub last_error: Option<String>,
}

/// Run `attempt` once plus up to `max_retries` more times. A timeout counts
/// as a failed attempt.
pub async fn deliver_with_retry<F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut attempt: F,
) -> DeliveryOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut last_error = None;
    let total = policy.max_retries + 1;
    for n in 0..total {
        match tokio::time::timeout(policy.timeout, attempt()).await {
            Ok(Ok(())) => {
                return DeliveryOutcome {
                    attempts: n + 1,
                    delivered: true,
                    last_error: None,
                }
            }
            Ok(Err(e)) => last_error = Some(e.to_string()),
            Err(_) => last_error = Some(format!("timed out after {:?}", policy.timeout)),
        }
        if n + 1 < total {
            let delay = policy.backoff(n);
            debug!("Retry {} for {} in {:?}", n + 1, label, delay);
            tokio::time::sleep(delay).await;
        }
    }
    DeliveryOutcome {
        attempts: total,
        delivered: false,
        last_error,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord<T> {
    pub item: T,
    pub delivered: bool,
    pub attempts: u32,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

type History<T> = Arc<Mutex<VecDeque<DeliveryRecord<T>>>>;

/// Bounded queue drained by one background task. Enqueueing never blocks the
/// caller; a full queue drops the item and records the failure. Only the
/// newest `history_limit` records are kept.
pub struct DeliveryQueue<T> {
    label: String,
    tx: mpsc::Sender<T>,
    history: History<T>,
    history_limit: usize,
    clock: SharedClock,
    worker: JoinHandle<()>,
}

async fn push_record<T>(history: &History<T>, limit: usize, record: DeliveryRecord<T>) {
    let mut h = history.lock().await;
    h.push_back(record);
    while h.len() > limit.max(1) {
        h.pop_front();
    }
}

impl<T> DeliveryQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn spawn<F, Fut>(
        label: &str,
        cfg: &AlertConfig,
        clock: SharedClock,
        deliver: F,
    ) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let policy = RetryPolicy::from_config(cfg);
        let history_limit = cfg.history_limit;
        let (tx, mut rx) = mpsc::channel::<T>(cfg.channel_capacity.max(1));
        let history: History<T> = Arc::new(Mutex::new(VecDeque::new()));

        let worker_history = history.clone();
        let worker_clock = clock.clone();
        let worker_label = label.to_string();
        let worker = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let out =
                    deliver_with_retry(&policy, &worker_label, || deliver(item.clone())).await;
                if !out.delivered {
                    warn!(
                        "{} delivery failed after {} attempts: {}",
                        worker_label,
                        out.attempts,
                        out.last_error.as_deref().unwrap_or("unknown")
                    );
                }
                let record = DeliveryRecord {
                    item,
                    delivered: out.delivered,
                    attempts: out.attempts,
                    error: out.last_error,
                    finished_at: worker_clock.now(),
                };
                push_record(&worker_history, history_limit, record).await;
            }
        });

        Self {
            label: label.to_string(),
            tx,
            history,
            history_limit,
            clock,
            worker,
        }
    }

    pub async fn enqueue(&self, item: T) {
        if let Err(e) = self.tx.try_send(item) {
            let (reason, item) = match e {
                mpsc::error::TrySendError::Full(i) => ("queue full", i),
                mpsc::error::TrySendError::Closed(i) => ("queue closed", i),
            };
            warn!("Dropping {}: {}", self.label, reason);
            let record = DeliveryRecord {
                item,
                delivered: false,
                attempts: 0,
                error: Some(reason.to_string()),
                finished_at: self.clock.now(),
            };
            push_record(&self.history, self.history_limit, record).await;
        }
    }

    pub async fn history(&self) -> Vec<DeliveryRecord<T>> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// Close the queue and wait for queued items to finish.
    pub async fn shutdown(self) -> Vec<DeliveryRecord<T>> {
        let Self {
            tx,
            history,
            worker,
            ..
        } = self;
        drop(tx);
        let _ = worker.await;
        let out = history.lock().await.iter().cloned().collect();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_helpers::base_time;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            base_backoff: Duration::from_millis(500),
            ..policy()
        };
        assert_eq!(p.backoff(0), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let out = deliver_with_retry(&policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    anyhow::bail!("transient");
                }
                Ok(())
            }
        })
        .await;
        assert!(out.delivered);
        assert_eq!(out.attempts, 3);
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let out = deliver_with_retry(&policy(), "slow", || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(!out.delivered);
        assert_eq!(out.attempts, 4);
        assert!(out.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let cfg = AlertConfig {
            channel_capacity: 1,
            max_retries: 3,
            base_backoff_ms: 1,
            timeout_ms: 50,
            history_limit: 100,
        };
        let clock = Arc::new(ManualClock::new(base_time()));
        let q = DeliveryQueue::spawn("slow item", &cfg, clock, |_: u32| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        });
        for i in 0..20 {
            q.enqueue(i).await;
        }
        let history = q.shutdown().await;
        assert_eq!(history.len(), 20);
        assert!(history.iter().any(|r| r.error.as_deref() == Some("queue full")));
        assert!(history.iter().any(|r| r.delivered));
    }

    #[tokio::test]
    async fn history_is_capped_and_clock_stamped() {
        let cfg = AlertConfig {
            channel_capacity: 16,
            max_retries: 0,
            base_backoff_ms: 1,
            timeout_ms: 50,
            history_limit: 3,
        };
        let clock = Arc::new(ManualClock::new(base_time()));
        let q = DeliveryQueue::spawn("item", &cfg, clock, |_: u32| async { Ok(()) });
        for i in 0..10 {
            q.enqueue(i).await;
        }
        let history = q.shutdown().await;
        let items: Vec<u32> = history.iter().map(|r| r.item).collect();
        assert_eq!(items, vec![7, 8, 9]);
        assert!(history.iter().all(|r| r.finished_at == base_time()));
    }
}
