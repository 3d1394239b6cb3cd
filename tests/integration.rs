mod common;

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use trade_sentinel::clock::{Clock, ManualClock};
use trade_sentinel::core::sltp::position_size;
use trade_sentinel::feed::replay::{FeedFrame, FeedSnapshot};
use trade_sentinel::feed::{IndicatorFeed, ReplayFeed};
use trade_sentinel::ledger::{Sha256Hasher, TradeLedger};
use trade_sentinel::models::{AlertType, Direction, LedgerAction, RiskTier};
use trade_sentinel::trading::{Pipeline, ProcessOutcome};

use common::{base_time, bullish_snapshot, flat_snapshot, market_context, test_config, RecordingSink};

fn pipeline(name: &str) -> (Pipeline, Arc<ManualClock>, Arc<RecordingSink>) {
    let clock = Arc::new(ManualClock::new(base_time()));
    let sink = RecordingSink::shared();
    let p = Pipeline::new(test_config(name), clock.clone(), sink.clone(), sink.clone());
    (p, clock, sink)
}

#[tokio::test]
async fn bullish_snapshot_becomes_recorded_buy() {
    let (p, _, sink) = pipeline("approve");
    let snap = bullish_snapshot("BTC-USD", base_time());
    let ctx = market_context(&snap);

    let outcome = p.process(&snap, &ctx).await.unwrap();
    let trade = outcome.approved().expect("approved trade").clone();
    assert_eq!(trade.direction, Direction::Buy);
    assert_eq!(trade.symbol, "BTC-USD");
    assert!(trade.stop_loss < trade.entry_price);
    assert!(trade.take_profit > trade.entry_price);
    assert!(trade.position_size > 0.0);
    // Notional never exceeds 10% of equity.
    assert!(trade.position_size * trade.entry_price <= 10_000.0 + 1e-6);
    assert_eq!(trade.snapshot_hash.len(), 64);
    assert_eq!(trade.ledger_record_id, 1);
    assert!(!trade.sealed);

    {
        let mut ledger = p.ledger().lock().await;
        let history = ledger.history(&trade.signal_id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, LedgerAction::Entry);
        assert_eq!(history[1].action, LedgerAction::Modify);
        assert!(ledger.verify_no_repaint(&trade.signal_id).unwrap());
    }

    // Same snapshot again is recognised, not re-recorded.
    let again = p.process(&snap, &ctx).await.unwrap();
    assert!(matches!(again, ProcessOutcome::Duplicate { .. }));
    assert_eq!(p.open_trades().await.len(), 1);

    let (_, executions) = p.shutdown().await;
    assert_eq!(executions.len(), 1);
    assert!(executions[0].delivered);
    assert_eq!(sink.trades.lock().await[0].signal_id, trade.signal_id);
}

#[tokio::test]
async fn duplicate_snapshot_leaves_rate_slot_free() {
    let clock = Arc::new(ManualClock::new(base_time()));
    let sink = RecordingSink::shared();
    let mut cfg = test_config("duplicate_rate");
    cfg.limits.max_signals_per_hour = 2;
    let p = Pipeline::new(cfg, clock.clone(), sink.clone(), sink.clone());

    let btc = bullish_snapshot("BTC-USD", base_time());
    assert!(p.process(&btc, &market_context(&btc)).await.unwrap().approved().is_some());
    for _ in 0..3 {
        let again = p.process(&btc, &market_context(&btc)).await.unwrap();
        assert!(matches!(again, ProcessOutcome::Duplicate { .. }));
    }

    let eth = bullish_snapshot("ETH-USD", base_time());
    let outcome = p.process(&eth, &market_context(&eth)).await.unwrap();
    assert!(outcome.approved().is_some(), "got {:?}", outcome);
    p.shutdown().await;
}

#[tokio::test]
async fn flat_and_stale_snapshots_produce_nothing() {
    let (p, _, _) = pipeline("no_signal");
    let flat = flat_snapshot("BTC-USD", base_time());
    let outcome = p.process(&flat, &market_context(&flat)).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::NoSignal(_)));

    let old = bullish_snapshot("BTC-USD", base_time() - Duration::minutes(10));
    let outcome = p.process(&old, &market_context(&old)).await.unwrap();
    match outcome {
        ProcessOutcome::Stale { age_secs, .. } => assert_eq!(age_secs, 600),
        other => panic!("expected stale, got {:?}", other),
    }

    assert_eq!(p.ledger().lock().await.snapshot_count(), 0);
    p.shutdown().await;
}

#[tokio::test]
async fn drawdown_blocks_then_halts_then_resumes() {
    let (p, clock, sink) = pipeline("drawdown");

    clock.advance(Duration::seconds(10));
    let upd = p.update_equity(97_000.0).await.unwrap();
    assert_eq!(upd.state.tier, RiskTier::Warning);

    // 0.83 confidence no longer clears the 0.85 warning floor.
    let snap = bullish_snapshot("BTC-USD", clock.now());
    let outcome = p.process(&snap, &market_context(&snap)).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Blocked { .. }));

    clock.advance(Duration::seconds(10));
    let upd = p.update_equity(94_000.0).await.unwrap();
    assert_eq!(upd.state.tier, RiskTier::Halted);
    assert!(upd.state.trading_paused);

    clock.advance(Duration::seconds(10));
    p.update_equity(95_000.0).await.unwrap();
    assert_eq!(p.drawdown_state().await.tier, RiskTier::Halted);
    let upd = p.manual_resume("operator review").await.unwrap();
    assert_eq!(upd.state.tier, RiskTier::Critical);

    let (alerts, _) = p.shutdown().await;
    assert!(alerts.iter().all(|a| a.delivered));
    let seen: Vec<AlertType> = sink.alerts.lock().await.iter().map(|a| a.alert_type).collect();
    assert!(seen.contains(&AlertType::DrawdownWarning));
    assert!(seen.contains(&AlertType::TradingHalted));
    assert!(seen.contains(&AlertType::ManualOverride));
}

#[tokio::test]
async fn trailing_stop_ratchets_and_closes() {
    let (p, clock, _) = pipeline("trailing");
    let snap = bullish_snapshot("BTC-USD", base_time());
    let outcome = p.process(&snap, &market_context(&snap)).await.unwrap();
    let trade = outcome.approved().unwrap().clone();

    clock.advance(Duration::minutes(5));
    let events = p.on_price_tick("BTC-USD", 105.0).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].triggered);
    assert!(events[0].to > events[0].from);
    let stop = events[0].to;

    clock.advance(Duration::minutes(5));
    let events = p.on_price_tick("BTC-USD", stop - 0.5).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].triggered);
    assert!(p.open_trades().await.is_empty());

    {
        let ledger = p.ledger().lock().await;
        let history = ledger.history(&trade.signal_id);
        let actions: Vec<LedgerAction> = history.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![
                LedgerAction::Entry,
                LedgerAction::Modify,
                LedgerAction::Modify,
                LedgerAction::Exit
            ]
        );
        let pnl = history[3].payload["pnl"].as_f64().unwrap();
        assert!(pnl > 0.0);
        // Four records fill one block.
        assert!(ledger.pending().is_empty());
    }

    assert!(p.verify_ledger().await.is_valid);
    p.shutdown().await;
}

#[tokio::test]
async fn exported_ledger_imports_and_rejects_tampering() {
    let (p, clock, _) = pipeline("export");
    let snap = bullish_snapshot("BTC-USD", base_time());
    p.process(&snap, &market_context(&snap)).await.unwrap();

    let cfg = p.config().clone();
    let path = std::path::PathBuf::from(&cfg.ledger.export_path);
    p.export_ledger(&path).await.unwrap();
    let json = std::fs::read_to_string(&path).unwrap();

    let restored = TradeLedger::import(
        &json,
        cfg.ledger.clone(),
        Arc::new(Sha256Hasher),
        clock.clone(),
    )
    .unwrap();
    assert_eq!(restored.snapshot_count(), 1);
    assert_eq!(restored.blocks().len(), 2);

    let forged = json.replacen("\"entry_price\": 100.0", "\"entry_price\": 101.0", 1);
    assert_ne!(forged, json);
    assert!(TradeLedger::import(&forged, cfg.ledger, Arc::new(Sha256Hasher), clock).is_err());
    p.shutdown().await;
}

#[tokio::test]
async fn replay_feed_drives_the_pipeline() {
    let (p, clock, _) = pipeline("replay");
    let snap = bullish_snapshot("BTC-USD", base_time());
    let ctx = market_context(&snap);
    let frames = vec![
        FeedFrame {
            at: base_time(),
            equity: Some(100_000.0),
            prices: HashMap::new(),
            snapshots: vec![FeedSnapshot {
                snapshot: snap,
                context: ctx,
            }],
        },
        FeedFrame {
            at: base_time() + Duration::minutes(1),
            equity: Some(100_500.0),
            prices: HashMap::from([("BTC-USD".to_string(), 104.0)]),
            snapshots: Vec::new(),
        },
    ];
    let json = serde_json::to_string(&frames).unwrap();
    let mut feed = ReplayFeed::from_json(&json).unwrap();

    assert!(feed.advance().await.unwrap());
    clock.set(feed.frame_time().unwrap());
    let item = feed.latest_snapshot("BTC-USD").await.unwrap().unwrap();
    let outcome = p.process(&item.snapshot, &item.context).await.unwrap();
    assert!(outcome.approved().is_some());

    assert!(feed.advance().await.unwrap());
    clock.set(feed.frame_time().unwrap());
    let equity = feed.current_equity().await.unwrap().unwrap();
    let upd = p.update_equity(equity).await.unwrap();
    assert_eq!(upd.state.tier, RiskTier::Normal);
    let price = feed.current_price("BTC-USD").await.unwrap().unwrap();
    let events = p.on_price_tick("BTC-USD", price).await.unwrap();
    assert!(events.iter().all(|e| !e.triggered));

    assert!(!feed.advance().await.unwrap());
    p.shutdown().await;
}

#[test]
fn risk_based_sizing() {
    assert!((position_size(100_000.0, 1.0, 100.0, 98.0) - 500.0).abs() < 1e-9);
    assert!((position_size(100_000.0, 1.0, 100.0, 102.0) - 500.0).abs() < 1e-9);
}
