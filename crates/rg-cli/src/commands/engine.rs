//! Commands that drive the engine against a file-backed paper venue.

use anyhow::{bail, Result};
use rg_broker_paper::PaperVenue;
use rg_config::RiskGuardConfig;
use rg_risk::{drawdown, SystemClock};
use rg_runtime::{loop_interval, run_loop, Engine, Services};
use rg_state::StateStore;
use std::path::Path;
use tracing::info;

use super::provision_unlock_secret;

pub fn tick(cfg: &RiskGuardConfig, venue_path: &Path) -> Result<()> {
    let venue = PaperVenue::load(venue_path)?;
    let svc = Services::open(cfg)?;
    provision_unlock_secret(cfg, &svc.store)?;

    let clock = SystemClock;
    let mut engine = Engine::new(
        cfg,
        &svc.store,
        &venue,
        svc.notifier.as_ref(),
        svc.logger.as_ref(),
        &clock,
    );
    let report = engine.tick()?;
    venue.save(venue_path)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn run(cfg: &RiskGuardConfig, venue_path: &Path) -> Result<()> {
    let venue = PaperVenue::load(venue_path)?;
    let svc = Services::open(cfg)?;
    provision_unlock_secret(cfg, &svc.store)?;

    let clock = SystemClock;
    let mut engine = Engine::new(
        cfg,
        &svc.store,
        &venue,
        svc.notifier.as_ref(),
        svc.logger.as_ref(),
        &clock,
    );
    let interval = loop_interval(cfg.run_loop.interval_secs);
    let passes = run_loop(&mut engine, interval, async {
        // An unavailable signal handler means "run until killed".
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await;

    venue.save(venue_path)?;
    println!("passes={passes}");
    Ok(())
}

pub fn unlock(cfg: &RiskGuardConfig, venue_path: &Path, secret: &str) -> Result<()> {
    let venue = PaperVenue::load(venue_path)?;
    let svc = Services::open(cfg)?;
    provision_unlock_secret(cfg, &svc.store)?;

    let clock = SystemClock;
    let engine = Engine::new(
        cfg,
        &svc.store,
        &venue,
        svc.notifier.as_ref(),
        svc.logger.as_ref(),
        &clock,
    );
    let report = engine.with_context(|ctx| drawdown::unlock(ctx, secret))?;
    venue.save(venue_path)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.ok {
        bail!("UNLOCK_REFUSED: {}", report.reason);
    }
    Ok(())
}

pub fn simulate_dd(cfg: &RiskGuardConfig, venue_path: &Path, pct: f64) -> Result<()> {
    let venue = PaperVenue::load(venue_path)?;
    let equity = venue.book().account.equity;
    let store = StateStore::open(&cfg.state.dir)?;

    let peak = drawdown::simulate(&store, pct, equity)?;
    info!(pct, equity, peak, "drawdown simulation armed; next pass evaluates it");
    println!("peak_equity={peak:.2} equity={equity:.2} dd_pct={pct:.2}");
    Ok(())
}
