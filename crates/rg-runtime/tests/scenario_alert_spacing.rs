//! Forwarded alerts respect per-kind spacing.
//!
//! # Invariants under test
//! - Every aggregate pass that changes something is logged as LIMITS.
//! - LIMITS alerts are spaced by the configured minimum interval; events
//!   are never suppressed, only alerts.
//! - The cold-start pass is silent.

use chrono::{Duration, TimeZone, Utc};
use rg_audit::MemoryEventLog;
use rg_broker_paper::{fx_symbol, PaperBook, PaperVenue};
use rg_config::RiskGuardConfig;
use rg_execution::CloserConfig;
use rg_notify::MemoryNotifier;
use rg_risk::ManualClock;
use rg_runtime::{Engine, KIND_LIMITS};
use rg_schemas::Side;
use rg_state::StateStore;

#[test]
fn limits_alerts_are_spaced_but_events_are_not() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path()).unwrap();
    let venue = PaperVenue::new(PaperBook::new(77, 10_000.0));
    venue.add_symbol(fx_symbol("EURUSD"), 1.10000, 1.10010);
    let notifier = MemoryNotifier::new();
    let log = MemoryEventLog::new();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 14, 0, 0).unwrap());

    let mut cfg = RiskGuardConfig::default();
    cfg.closer = CloserConfig::without_delays();
    cfg.per_trade.max_risk_pct = 10.0;
    cfg.alerts.min_interval_secs.insert(KIND_LIMITS.to_string(), 10.0);

    let mut engine = Engine::new(&cfg, &store, &venue, &notifier, &log, &clock);
    engine.tick().unwrap();
    assert!(log.of_type(KIND_LIMITS).is_empty(), "cold start is silent");

    // 1 lot, 60-pip stop: 6% of equity, over the 5% aggregate limit.
    let step = |secs: i64| {
        clock.advance(Duration::seconds(secs));
        venue.open("EURUSD", Side::Buy, 1.0, 1.10000, Some(1.09400));
    };

    step(2);
    let r = engine.tick().unwrap().aggregate.unwrap();
    assert_eq!(r.closed.len(), 1);
    assert_eq!(r.attempts, 1);

    step(2);
    engine.tick().unwrap();
    step(10);
    let r = engine.tick().unwrap().aggregate.unwrap();
    assert!(r.blocked);

    assert_eq!(log.of_type(KIND_LIMITS).len(), 3);
    let sent = notifier.sent_of_kind(KIND_LIMITS);
    assert_eq!(sent.len(), 2, "second pass fell inside the 10 s window");
    assert!(sent[1].body().contains("RISK BLOCK ACTIVE"));
    assert_eq!(notifier.sent_of_kind("RISK_BLOCK").len(), 1);
    assert!(venue.open_tickets().is_empty());
}
