use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::config::Config;
use crate::core::sltp::{SizingInputs, SltpAdjustment, SltpCalculator};
use crate::core::trailing::{TrailingStopManager, TrailingUpdate};
use crate::error::{LedgerError, PipelineError};
use crate::ledger::{ChainVerification, TradeLedger};
use crate::models::{
    Alert, AlertSeverity, AlertType, IndicatorSnapshot, LedgerAction, MarketContext, RiskTier,
};
use crate::risk::circuit_breaker::{DrawdownCircuitBreaker, DrawdownState, EquityUpdate};
use crate::risk::gate::{GateDecision, RejectReason, RiskGate};
use crate::strategies::scorer::{NoSignal, SignalScorer};
use crate::strategies::signals::ApprovedTrade;
use crate::trading::alerts::{AlertDelivery, AlertDispatcher, AlertSink};
use crate::trading::execution::{ExecutionDelivery, ExecutionDispatcher, ExecutionSink};
use crate::trading::performance::{ClosedTrade, Outcome, PerformanceTracker};

const PERFORMANCE_WINDOW: usize = 100;
/// Trailing distance factor applied when the breaker asks for tighter stops.
const TIGHTEN_FACTOR: f64 = 0.75;

/// What happened to one snapshot.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Approved(Box<ApprovedTrade>),
    NoSignal(NoSignal),
    Stale { symbol: String, age_secs: i64 },
    Blocked { signal_id: String, reason: String },
    Rejected { signal_id: String, reason: RejectReason },
    /// The same snapshot was already decided and recorded.
    Duplicate { signal_id: String },
}

impl ProcessOutcome {
    pub fn approved(&self) -> Option<&ApprovedTrade> {
        match self {
            ProcessOutcome::Approved(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingEvent {
    pub trade_id: String,
    pub symbol: String,
    pub from: f64,
    pub to: f64,
    pub triggered: bool,
}

#[derive(Debug, Clone)]
struct OpenTrade {
    trade: ApprovedTrade,
    opened_at: DateTime<Utc>,
}

/// Service context that owns every stateful component and runs the decision
/// flow: score, breaker, gate, size, record, hand off.
///
/// Each mutable aggregate sits behind its own mutex. Locks are taken one at a
/// time and never held across a dispatch.
pub struct Pipeline {
    cfg: Config,
    clock: SharedClock,
    scorer: SignalScorer,
    breaker: Mutex<DrawdownCircuitBreaker>,
    gate: Mutex<RiskGate>,
    sltp: Mutex<SltpCalculator>,
    ledger: Mutex<TradeLedger>,
    trailing: Mutex<TrailingStopManager>,
    performance: Mutex<PerformanceTracker>,
    open: Mutex<HashMap<String, OpenTrade>>,
    alerts: AlertDispatcher,
    execution: ExecutionDispatcher,
}

impl Pipeline {
    pub fn new(
        cfg: Config,
        clock: SharedClock,
        alert_sink: Arc<dyn AlertSink>,
        execution_sink: Arc<dyn ExecutionSink>,
    ) -> Self {
        let ledger = TradeLedger::new(cfg.ledger.clone(), clock.clone());
        Self::with_ledger(cfg, clock, ledger, alert_sink, execution_sink)
    }

    /// Build around an existing ledger, e.g. one restored with `TradeLedger::import`.
    pub fn with_ledger(
        cfg: Config,
        clock: SharedClock,
        ledger: TradeLedger,
        alert_sink: Arc<dyn AlertSink>,
        execution_sink: Arc<dyn ExecutionSink>,
    ) -> Self {
        let breaker = DrawdownCircuitBreaker::new(
            cfg.drawdown.clone(),
            cfg.scorer.min_confidence,
            cfg.initial_equity,
            clock.clone(),
        );
        let gate = RiskGate::new(
            &cfg.account_id,
            cfg.limits.clone(),
            cfg.scorer.min_risk_reward,
            cfg.scorer.max_risk_reward,
        );
        let sltp = SltpCalculator::new(cfg.sltp.clone());
        let trailing = TrailingStopManager::new(cfg.sltp.trailing_atr_multiple);
        let performance = PerformanceTracker::persistent(PERFORMANCE_WINDOW, &cfg.data_dir);
        let alerts = AlertDispatcher::spawn(alert_sink, &cfg.alerts, clock.clone());
        let execution = ExecutionDispatcher::spawn(execution_sink, &cfg.alerts, clock.clone());

        Self {
            scorer: SignalScorer::new(cfg.scorer.clone()),
            breaker: Mutex::new(breaker),
            gate: Mutex::new(gate),
            sltp: Mutex::new(sltp),
            ledger: Mutex::new(ledger),
            trailing: Mutex::new(trailing),
            performance: Mutex::new(performance),
            open: Mutex::new(HashMap::new()),
            alerts,
            execution,
            clock,
            cfg,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    // ── Decision flow ───────────────────────────────────────────

    pub async fn process(
        &self,
        snapshot: &IndicatorSnapshot,
        ctx: &MarketContext,
    ) -> Result<ProcessOutcome, PipelineError> {
        let now = self.clock.now();
        let max_age = Duration::seconds(self.cfg.scheduler.stale_after_secs);
        if snapshot.is_stale(now, max_age) {
            let age_secs = (now - snapshot.timestamp).num_seconds();
            warn!(
                "Stale indicator data for {}: {}s old, skipping",
                snapshot.symbol, age_secs
            );
            return Ok(ProcessOutcome::Stale {
                symbol: snapshot.symbol.clone(),
                age_secs,
            });
        }

        let history = self.performance.lock().await.stats(&snapshot.symbol);
        let candidate = match self.scorer.score(snapshot, ctx, history.as_ref(), now) {
            Ok(c) => c,
            Err(reason) => return Ok(ProcessOutcome::NoSignal(reason)),
        };

        // Already decided: skip before anything counts against the account.
        if self.ledger.lock().await.snapshot(&candidate.id).is_some() {
            debug!("{} already recorded, skipping", candidate.id);
            return Ok(ProcessOutcome::Duplicate {
                signal_id: candidate.id,
            });
        }

        let (accept, dd) = {
            let breaker = self.breaker.lock().await;
            (breaker.should_accept_signal(&candidate), breaker.state())
        };
        if !accept.accepted {
            info!("{} blocked by circuit breaker: {}", candidate.id, accept.reason);
            return Ok(ProcessOutcome::Blocked {
                signal_id: candidate.id,
                reason: accept.reason,
            });
        }

        let (decision, risk_pct) = {
            let mut gate = self.gate.lock().await;
            let decision = gate.validate(&candidate, &dd, dd.last_equity, now);
            (decision, gate.limits().max_risk_per_trade_pct)
        };
        if let GateDecision::Reject { reason } = decision {
            return Ok(ProcessOutcome::Rejected {
                signal_id: candidate.id,
                reason,
            });
        }

        let inputs = SizingInputs {
            balance: dd.last_equity,
            risk_pct,
            confidence: accept.adjusted_confidence,
            multiplier: accept.position_multiplier * decision.size_multiplier(),
            at: now,
        };
        let (levels, atr) = {
            let sltp = self.sltp.lock().await;
            let levels = sltp.size(
                &candidate.symbol,
                candidate.direction,
                candidate.entry_price,
                snapshot,
                ctx,
                &inputs,
            );
            (levels, sltp.atr(snapshot, ctx))
        };

        let created = self.ledger.lock().await.create_snapshot(&candidate);
        let receipt = match created {
            Ok(r) => r,
            Err(e) => {
                // Nothing was recorded, so the approval does not count.
                self.gate.lock().await.release_slot(now);
                if let LedgerError::DuplicateSnapshot(id) = e {
                    debug!("{} recorded concurrently, skipping", id);
                    return Ok(ProcessOutcome::Duplicate { signal_id: id });
                }
                return Err(e.into());
            }
        };
        let sealed = {
            let mut ledger = self.ledger.lock().await;
            ledger.append(
                &candidate.id,
                LedgerAction::Modify,
                json!({
                    "event": "sized",
                    "levels": serde_json::to_value(&levels).map_err(LedgerError::from)?,
                    "gate": serde_json::to_value(&decision).map_err(LedgerError::from)?,
                }),
            )?;
            ledger.is_sealed(receipt.record_id)
        };

        self.trailing.lock().await.init(
            &candidate.id,
            &candidate.symbol,
            candidate.direction,
            candidate.entry_price,
            levels.stop_loss.price,
            atr,
        );

        let trade = ApprovedTrade {
            signal_id: candidate.id.clone(),
            symbol: candidate.symbol.clone(),
            direction: candidate.direction,
            entry_price: candidate.entry_price,
            stop_loss: levels.stop_loss.price,
            take_profit: levels.take_profit.price,
            position_size: levels.position_size,
            confidence: candidate.confidence,
            snapshot_hash: receipt.content_hash,
            ledger_record_id: receipt.record_id,
            sealed,
            approved_at: now,
            levels,
        };
        info!(
            "Approved {} {} {} size {:.6} (confidence {:.1}%)",
            trade.signal_id,
            trade.direction,
            trade.symbol,
            trade.position_size,
            trade.confidence * 100.0
        );

        self.open.lock().await.insert(
            trade.signal_id.clone(),
            OpenTrade {
                trade: trade.clone(),
                opened_at: now,
            },
        );
        self.execution.submit(trade.clone()).await;
        Ok(ProcessOutcome::Approved(Box::new(trade)))
    }

    // ── Risk state ──────────────────────────────────────────────

    pub async fn update_equity(&self, equity: f64) -> Result<EquityUpdate, PipelineError> {
        let update = self.breaker.lock().await.update_equity(equity)?;
        if let Some(t) = &update.transition {
            if t.to > t.from && update.state.tighten_stops {
                self.trailing.lock().await.tighten(TIGHTEN_FACTOR);
            }
            if t.to == RiskTier::Halted {
                let open = self.open.lock().await.len();
                error!(
                    "Trading halted at {:.2}% drawdown, emergency exit flagged for {} open trade(s)",
                    t.drawdown_pct, open
                );
            }
        }
        self.alerts.dispatch_all(update.alerts.clone()).await;
        Ok(update)
    }

    pub async fn manual_halt(&self, reason: &str) -> EquityUpdate {
        let update = self.breaker.lock().await.manual_halt(reason);
        self.alerts.dispatch_all(update.alerts.clone()).await;
        update
    }

    pub async fn manual_resume(&self, reason: &str) -> Result<EquityUpdate, PipelineError> {
        let update = self.breaker.lock().await.manual_resume(reason)?;
        self.alerts.dispatch_all(update.alerts.clone()).await;
        Ok(update)
    }

    pub async fn drawdown_state(&self) -> DrawdownState {
        self.breaker.lock().await.state()
    }

    // ── Open trades ─────────────────────────────────────────────

    /// Ratchet trailing stops for `symbol` and close any trade whose stop was
    /// crossed. Runs regardless of the breaker tier.
    pub async fn on_price_tick(
        &self,
        symbol: &str,
        price: f64,
    ) -> Result<Vec<TrailingEvent>, PipelineError> {
        let ids: Vec<String> = self
            .open
            .lock()
            .await
            .values()
            .filter(|o| o.trade.symbol == symbol)
            .map(|o| o.trade.signal_id.clone())
            .collect();

        let mut events = Vec::new();
        for id in ids {
            let update = self.trailing.lock().await.update(&id, price);
            match update {
                Some(TrailingUpdate::Moved { from, to }) => {
                    let appended = self.ledger.lock().await.append(
                        &id,
                        LedgerAction::Modify,
                        json!({"event": "trailing_stop", "from": from, "to": to, "price": price}),
                    );
                    if let Err(e) = appended {
                        error!("Failed to record trailing stop for {}: {}", id, e);
                    }
                    events.push(TrailingEvent {
                        trade_id: id,
                        symbol: symbol.to_string(),
                        from,
                        to,
                        triggered: false,
                    });
                }
                Some(TrailingUpdate::Triggered { stop, .. }) => {
                    self.close_trade(&id, stop).await?;
                    events.push(TrailingEvent {
                        trade_id: id,
                        symbol: symbol.to_string(),
                        from: stop,
                        to: stop,
                        triggered: true,
                    });
                }
                Some(TrailingUpdate::Unchanged) | None => {}
            }
        }
        Ok(events)
    }

    /// Close an open trade at `exit_price`: record the result everywhere it
    /// matters and write the EXIT record.
    pub async fn close_trade(
        &self,
        trade_id: &str,
        exit_price: f64,
    ) -> Result<ClosedTrade, PipelineError> {
        let open = self
            .open
            .lock()
            .await
            .remove(trade_id)
            .ok_or_else(|| PipelineError::UnknownTrade(trade_id.to_string()))?;
        let now = self.clock.now();
        let t = &open.trade;
        let move_per_unit = (exit_price - t.entry_price) * t.direction.sign();
        let pnl = round2(move_per_unit * t.position_size);
        let risk_per_unit = (t.entry_price - t.stop_loss).abs();
        let r_multiple = if risk_per_unit > 0.0 {
            round2(move_per_unit / risk_per_unit)
        } else {
            0.0
        };
        let pattern = self
            .ledger
            .lock()
            .await
            .snapshot(trade_id)
            .and_then(|s| s.signal.pattern.clone());

        let closed = ClosedTrade {
            trade_id: t.signal_id.clone(),
            symbol: t.symbol.clone(),
            direction: t.direction,
            entry_price: t.entry_price,
            exit_price,
            position_size: t.position_size,
            pnl,
            r_multiple,
            outcome: Outcome::from_pnl(pnl),
            confidence: t.confidence,
            pattern,
            opened_at: open.opened_at,
            closed_at: now,
        };

        self.trailing.lock().await.remove(trade_id);
        self.gate.lock().await.record_trade_result(pnl, now);
        let summary = {
            let mut perf = self.performance.lock().await;
            perf.record(closed.clone());
            perf.summary(&t.symbol)
        };
        if let Some(s) = summary {
            let avg_win_r = (s.wins > 0).then_some(s.avg_win_r);
            let tuned = {
                let mut sltp = self.sltp.lock().await;
                sltp.optimize(&t.symbol, s.wins + s.losses, s.win_rate, avg_win_r, now);
                sltp.tuning(&t.symbol)
            };
            self.gate
                .lock()
                .await
                .set_symbol_min_risk_reward(&t.symbol, tuned.min_risk_reward);
        }

        self.ledger.lock().await.append(
            trade_id,
            LedgerAction::Exit,
            json!({
                "exit_price": exit_price,
                "pnl": pnl,
                "outcome": closed.outcome,
                "hold_secs": closed.hold_duration_secs(),
            }),
        )?;
        info!(
            "Closed {} {} @ {:.4}: pnl {:+.2}",
            trade_id, t.symbol, exit_price, pnl
        );
        Ok(closed)
    }

    /// Withdraw an open trade without a fill.
    pub async fn cancel_trade(&self, trade_id: &str, reason: &str) -> Result<(), PipelineError> {
        self.open
            .lock()
            .await
            .remove(trade_id)
            .ok_or_else(|| PipelineError::UnknownTrade(trade_id.to_string()))?;
        self.trailing.lock().await.remove(trade_id);
        self.ledger
            .lock()
            .await
            .append(trade_id, LedgerAction::Cancel, json!({ "reason": reason }))?;
        info!("Cancelled {}: {}", trade_id, reason);
        Ok(())
    }

    pub async fn open_trades(&self) -> Vec<ApprovedTrade> {
        self.open
            .lock()
            .await
            .values()
            .map(|o| o.trade.clone())
            .collect()
    }

    // ── Ledger ──────────────────────────────────────────────────

    /// Seal pending records and confirm snapshots whose grace window passed.
    pub async fn seal(&self) -> Result<Option<u64>, PipelineError> {
        let mut ledger = self.ledger.lock().await;
        let block = ledger.flush()?;
        let ids: Vec<String> = self.open.lock().await.keys().cloned().collect();
        for id in ids {
            let confirmed = ledger.snapshot(&id).is_some_and(|s| s.confirmed);
            if confirmed {
                continue;
            }
            match ledger.confirm_immutable(&id) {
                Ok(()) | Err(LedgerError::GraceWindowOpen { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(block)
    }

    /// Full chain verification. A failure raises a critical alert and leaves
    /// the ledger refusing writes until reconciled.
    pub async fn verify_ledger(&self) -> ChainVerification {
        let v = self.ledger.lock().await.verify_chain();
        if !v.is_valid {
            self.alerts
                .dispatch(Alert {
                    alert_type: AlertType::LedgerIntegrity,
                    severity: AlertSeverity::Critical,
                    message: v.message.clone(),
                    current_value: v.first_broken_block.unwrap_or(0) as f64,
                    threshold: 0.0,
                    timestamp: self.clock.now(),
                })
                .await;
        }
        v
    }

    pub async fn reconcile_ledger(&self) -> Result<ChainVerification, PipelineError> {
        Ok(self.ledger.lock().await.reconcile()?)
    }

    pub async fn export_ledger(&self, path: &Path) -> Result<(), PipelineError> {
        Ok(self.ledger.lock().await.export_to_file(path)?)
    }

    /// Direct access for read-only inspection in reports and tests.
    pub fn ledger(&self) -> &Mutex<TradeLedger> {
        &self.ledger
    }

    pub async fn sltp_adjustments(&self) -> Vec<SltpAdjustment> {
        self.sltp.lock().await.adjustment_history.clone()
    }

    /// Stop the background dispatchers after draining their queues.
    pub async fn shutdown(self) -> (Vec<AlertDelivery>, Vec<ExecutionDelivery>) {
        let alerts = self.alerts.shutdown().await;
        let executions = self.execution.shutdown().await;
        (alerts, executions)
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
