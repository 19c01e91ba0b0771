//! One enforcement pass end to end against the paper venue.
//!
//! # Invariants under test
//! - Snapshot failures never abort: each is an ERROR event; after
//!   `snapshot_max_fails` in a row one SNAPSHOT_STALE alert goes out and the
//!   counter starts over.
//! - A present pause marker skips the pass without touching the venue.
//! - A marker nobody clears raises one PAUSED event after `pause_alert_secs`
//!   and is removed after `pause_stale_secs`; that pass then enforces.
//! - A failing module is reported with its name; the remaining modules run.
//! - A drawdown trip flattens, disables automated execution, and a position
//!   opened afterwards is reported as a breach exactly once.
//! - After the cooldown the lock re-arms until the secret unlock, which
//!   re-enables automated execution.

use chrono::{Duration, TimeZone, Utc};
use rg_audit::MemoryEventLog;
use rg_broker_paper::{fx_symbol, PaperBook, PaperVenue, VenueCall};
use rg_config::RiskGuardConfig;
use rg_execution::CloserConfig;
use rg_notify::MemoryNotifier;
use rg_risk::{drawdown, ManualClock, PerTradeMode};
use rg_runtime::{Engine, KIND_DD_KILL, KIND_PAUSED, KIND_PER_TRADE, KIND_SNAPSHOT_STALE};
use rg_schemas::Side;
use rg_state::{docs, StateStore};
use tempfile::TempDir;

struct Rig {
    _dir: TempDir,
    cfg: RiskGuardConfig,
    store: StateStore,
    venue: PaperVenue,
    notifier: MemoryNotifier,
    log: MemoryEventLog,
    clock: ManualClock,
}

impl Rig {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state")).unwrap();
        let venue = PaperVenue::new(PaperBook::new(4242, 10_000.0));
        venue.add_symbol(fx_symbol("EURUSD"), 1.10000, 1.10010);
        let mut cfg = RiskGuardConfig::default();
        cfg.closer = CloserConfig::without_delays();
        Self {
            _dir: dir,
            cfg,
            store,
            venue,
            notifier: MemoryNotifier::new(),
            log: MemoryEventLog::new(),
            clock: ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()),
        }
    }

    fn engine(&self) -> Engine<'_> {
        Engine::new(
            &self.cfg,
            &self.store,
            &self.venue,
            &self.notifier,
            &self.log,
            &self.clock,
        )
    }

    /// 0.1 lot with a 50-pip stop: 0.5% of 10k, inside every default limit.
    fn open_small(&self) -> u64 {
        self.venue
            .open("EURUSD", Side::Buy, 0.1, 1.10000, Some(1.09500))
    }
}

#[test]
fn snapshot_failures_escalate_once_then_reset() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    rig.venue.fail_snapshots(4);

    let fails: Vec<u32> = (0..5)
        .map(|_| engine.tick().unwrap().snapshot_fails)
        .collect();
    assert_eq!(fails, vec![1, 2, 0, 1, 0]);

    assert_eq!(rig.notifier.sent_of_kind(KIND_SNAPSHOT_STALE).len(), 1);
    let errors = rig.log.of_type("ERROR");
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(|e| e.context["module"] == "reader"));
}

#[test]
fn pause_marker_skips_the_pass() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    std::fs::write(engine.pause_marker(), "pid=1").unwrap();

    let r = engine.tick().unwrap();
    assert!(r.paused);
    assert!(r.per_trade.is_none());
    assert!(!rig
        .venue
        .journal()
        .iter()
        .any(|c| matches!(c, VenueCall::Snapshot)));

    std::fs::remove_file(engine.pause_marker()).unwrap();
    assert!(!engine.tick().unwrap().paused);
}

#[test]
fn leftover_pause_marker_is_reported_then_reclaimed() {
    let mut rig = Rig::new();
    rig.cfg.per_trade.mode = PerTradeMode::Immediate;
    let naked = rig.venue.open("EURUSD", Side::Buy, 0.3, 1.10000, None);
    let mut engine = rig.engine();
    std::fs::write(engine.pause_marker(), "pid=999999 at=crashed\n").unwrap();

    assert!(engine.tick().unwrap().paused);
    assert!(rig.log.of_type("PAUSED").is_empty());

    rig.clock.advance(Duration::seconds(30));
    assert!(engine.tick().unwrap().paused);
    rig.clock.advance(Duration::seconds(5));
    assert!(engine.tick().unwrap().paused);
    assert_eq!(rig.log.of_type("PAUSED").len(), 1);
    assert_eq!(rig.notifier.sent_of_kind(KIND_PAUSED).len(), 1);
    assert!(rig.venue.book().positions.contains_key(&naked));

    rig.clock.advance(Duration::seconds(30));
    let r = engine.tick().unwrap();
    assert!(!r.paused);
    assert!(!engine.pause_marker().exists());
    assert_eq!(rig.log.of_type("PAUSE_MARKER_RECLAIMED").len(), 1);
    let pt = r.per_trade.expect("per-trade ran");
    assert_eq!(pt.closed.len(), 1);
    assert_eq!(pt.closed[0].ticket, naked);
}

#[test]
fn failing_module_does_not_stop_the_others() {
    let mut rig = Rig::new();
    rig.cfg.per_trade.mode = PerTradeMode::Immediate;
    // A directory where the aggregate document belongs: every write fails.
    std::fs::create_dir_all(rig.store.path_of(docs::AGGREGATE)).unwrap();
    let naked = rig.venue.open("EURUSD", Side::Sell, 0.2, 1.10000, None);

    let mut engine = rig.engine();
    let r = engine.tick().unwrap();

    assert_eq!(r.errors.len(), 1);
    assert_eq!(r.errors[0].module, "aggregate");
    assert!(r.aggregate.is_none());

    let pt = r.per_trade.expect("per-trade ran");
    assert_eq!(pt.closed.len(), 1);
    assert_eq!(pt.closed[0].ticket, naked);
    assert!(r.drawdown.is_some());
    assert!(r.breach.is_some());

    let err_events = rig.log.of_type("ERROR");
    assert_eq!(err_events.len(), 1);
    assert_eq!(err_events[0].context["module"], "aggregate");

    let alerts = rig.notifier.sent_of_kind(KIND_PER_TRADE);
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].body().contains("no stop-loss"));
}

#[test]
fn drawdown_trip_blocks_and_reports_breach_once() {
    let rig = Rig::new();
    let mut engine = rig.engine();
    rig.open_small();
    rig.open_small();

    let r1 = engine.tick().unwrap();
    assert!(r1.errors.is_empty());
    assert!(!r1.drawdown.unwrap().tripped);

    rig.venue.set_equity(7_900.0);
    rig.clock.advance(Duration::seconds(2));
    let r2 = engine.tick().unwrap();
    let dd = r2.drawdown.unwrap();
    assert!(dd.tripped_now);
    assert_eq!(dd.closed.len(), 2);
    assert!(rig.venue.open_tickets().is_empty());
    assert!(!rig.venue.automation_enabled());
    assert_eq!(rig.log.of_type(KIND_DD_KILL).len(), 1);
    assert_eq!(rig.notifier.sent_of_kind("DD_KILL").len(), 1, "trip announced once");

    // Someone trades anyway.
    rig.venue.set_automation(true);
    let sneaky = rig.open_small();
    rig.venue.set_automation(false);

    for _ in 0..3 {
        rig.clock.advance(Duration::seconds(2));
        engine.tick().unwrap();
    }
    let breaches = rig.log.of_type("BLOCK_BREACH");
    assert_eq!(breaches.len(), 1);
    assert_eq!(breaches[0].payload["tickets"], serde_json::json!([sneaky]));
    assert_eq!(rig.notifier.sent_of_kind("BLOCK_BREACH").len(), 1);
}

#[test]
fn lock_rearms_after_cooldown_until_unlocked() {
    let rig = Rig::new();
    drawdown::set_secret(&rig.store, "2468").unwrap();
    let mut engine = rig.engine();

    engine.tick().unwrap();
    rig.venue.set_equity(7_500.0);
    assert!(engine.tick().unwrap().drawdown.unwrap().tripped_now);
    assert!(!rig.venue.automation_enabled());

    rig.clock.advance(Duration::days(31));
    rig.venue.set_equity(9_500.0);
    let r = engine.tick().unwrap();
    assert!(!r.lock_released, "awaiting unlock keeps the lock");
    let dd = r.drawdown.unwrap();
    assert!(dd.awaiting_unlock);
    assert!(!dd.in_cooldown);
    assert!(dd.rearmed_until.is_some());
    assert!(!rig.venue.automation_enabled());

    let unlocked = engine
        .with_context(|ctx| drawdown::unlock(ctx, "2468"))
        .unwrap();
    assert!(unlocked.ok);
    assert!(unlocked.lock_released);
    assert!(rig.venue.automation_enabled());

    rig.clock.advance(Duration::seconds(2));
    let after = engine.tick().unwrap();
    let dd = after.drawdown.unwrap();
    assert!(!dd.awaiting_unlock);
    assert!(dd.rearmed_until.is_none());
    assert!(rig.venue.automation_enabled());
}
