//! Breach detector de-duplication.
//!
//! # Invariants under test
//! - With no active block nothing is reported, whatever is open.
//! - While any block is active each open ticket is reported exactly once,
//!   across any number of passes; later tickets are reported on their own.
//! - The detector never sends an order.

use chrono::{Duration, TimeZone, Utc};
use rg_audit::MemoryEventLog;
use rg_broker_paper::{fx_symbol, PaperBook, PaperVenue, VenueCall};
use rg_execution::{AccountSource, CloserConfig, PositionCloser};
use rg_notify::MemoryNotifier;
use rg_risk::{breach, execution_lock, BreachReport, Clock, EngineContext, ManualClock};
use rg_schemas::Side;
use rg_state::StateStore;
use tempfile::TempDir;

struct Rig {
    _dir: TempDir,
    store: StateStore,
    venue: PaperVenue,
    notifier: MemoryNotifier,
    log: MemoryEventLog,
    clock: ManualClock,
}

impl Rig {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let venue = PaperVenue::new(PaperBook::new(9009, 2_000.0));
        venue.add_symbol(fx_symbol("EURUSD"), 1.10000, 1.10010);
        Self {
            _dir: dir,
            store,
            venue,
            notifier: MemoryNotifier::new(),
            log: MemoryEventLog::new(),
            clock: ManualClock::new(Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()),
        }
    }

    fn with_ctx<R>(&self, f: impl FnOnce(&EngineContext<'_>) -> R) -> R {
        let closer = PositionCloser::new(&self.venue, &self.venue, CloserConfig::without_delays());
        let ctx = EngineContext {
            store: &self.store,
            closer: &closer,
            toggle: &self.venue,
            notifier: &self.notifier,
            logger: &self.log,
            clock: &self.clock,
        };
        f(&ctx)
    }

    fn detect(&self) -> BreachReport {
        let snap = self.venue.snapshot().unwrap();
        self.with_ctx(|ctx| breach::detect_and_report(ctx, &snap).unwrap())
    }
}

#[test]
fn nothing_reported_without_a_block() {
    let rig = Rig::new();
    rig.venue.open("EURUSD", Side::Buy, 0.1, 1.10000, None);
    let r = rig.detect();
    assert!(!r.block.any());
    assert!(r.reported.is_empty());
    assert!(rig.log.of_type("BLOCK_BREACH").is_empty());
}

#[test]
fn each_ticket_is_reported_once_while_blocked() {
    let rig = Rig::new();
    let until = rig.clock.now() + Duration::hours(4);
    rig.with_ctx(|ctx| execution_lock::engage(ctx, until, "maintenance").unwrap());

    let a = rig.venue.open("EURUSD", Side::Buy, 0.1, 1.10000, None);
    let b = rig.venue.open("EURUSD", Side::Sell, 0.3, 1.10000, Some(1.10200));

    let r = rig.detect();
    assert!(r.block.kill_active);
    assert_eq!(r.reported, vec![a, b]);

    for _ in 0..3 {
        rig.clock.advance(Duration::minutes(1));
        assert!(rig.detect().reported.is_empty());
    }

    let c = rig.venue.open("EURUSD", Side::Buy, 0.01, 1.10000, None);
    assert_eq!(rig.detect().reported, vec![c]);

    let logged = rig.log.of_type("BLOCK_BREACH");
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[0].context["module"], "guard");
    assert_eq!(logged[0].payload["block_state"]["kill_active"], true);

    let alerts = rig.notifier.sent_of_kind("BLOCK_BREACH");
    assert_eq!(alerts.len(), 2);
    assert!(alerts[0].body().contains(&format!("#{a}")));
    assert!(alerts[1].body().contains(&format!("#{c}")));

    assert!(!rig
        .venue
        .journal()
        .iter()
        .any(|c| matches!(c, VenueCall::Send { .. } | VenueCall::Modify { .. })));
}

#[test]
fn expired_lock_stops_reporting() {
    let rig = Rig::new();
    let until = rig.clock.now() + Duration::minutes(10);
    rig.with_ctx(|ctx| execution_lock::engage(ctx, until, "maintenance").unwrap());

    rig.clock.advance(Duration::minutes(11));
    rig.venue.open("EURUSD", Side::Buy, 0.1, 1.10000, None);
    let r = rig.detect();
    assert!(!r.block.any());
    assert!(r.reported.is_empty());
}
