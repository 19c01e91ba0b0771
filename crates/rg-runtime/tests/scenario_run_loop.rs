//! Loop driver.
//!
//! # Invariants under test
//! - The loop keeps ticking at the interval until shutdown resolves, then
//!   returns the number of passes.
//! - A venue that keeps failing does not stop the loop.
//! - Passes run off the async workers: a timer on the same runtime keeps
//!   firing while the loop ticks.

use rg_audit::NoopEventLog;
use rg_broker_paper::{PaperBook, PaperVenue};
use rg_config::RiskGuardConfig;
use rg_notify::NoopNotifier;
use rg_risk::SystemClock;
use rg_runtime::{loop_interval, run_loop, Engine};
use rg_state::StateStore;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loop_runs_until_shutdown_despite_failures() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path()).unwrap();
    let venue = PaperVenue::new(PaperBook::new(1, 5_000.0));
    venue.fail_snapshots(1_000);
    let cfg = RiskGuardConfig::default();

    let mut engine = Engine::new(&cfg, &store, &venue, &NoopNotifier, &NoopEventLog, &SystemClock);
    let passes = run_loop(
        &mut engine,
        Duration::from_millis(10),
        tokio::time::sleep(Duration::from_millis(120)),
    )
    .await;

    assert!(passes >= 3, "only {passes} passes");
    assert!(passes <= 20, "{passes} passes, interval not respected");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_pass_does_not_starve_other_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path()).unwrap();
    let venue = PaperVenue::new(PaperBook::new(1, 5_000.0));
    let cfg = RiskGuardConfig::default();

    let ticker = tokio::spawn(async {
        let mut beats = 0u32;
        let mut every = tokio::time::interval(Duration::from_millis(5));
        for _ in 0..10 {
            every.tick().await;
            beats += 1;
        }
        beats
    });

    let mut engine = Engine::new(&cfg, &store, &venue, &NoopNotifier, &NoopEventLog, &SystemClock);
    let passes = run_loop(
        &mut engine,
        Duration::from_millis(1),
        tokio::time::sleep(Duration::from_millis(150)),
    )
    .await;

    assert!(passes >= 1);
    assert_eq!(ticker.await.unwrap(), 10);
}

#[test]
fn interval_from_seconds() {
    assert_eq!(loop_interval(2.0), Duration::from_millis(2000));
    assert_eq!(loop_interval(0.0001), Duration::from_millis(1));
}
