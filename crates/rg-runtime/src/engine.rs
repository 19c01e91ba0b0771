use anyhow::Result;
use chrono::{DateTime, Utc};
use rg_audit::EventLogger;
use rg_config::RiskGuardConfig;
use rg_execution::{
    marker_age, reclaim_marker, AccountSource, AutomationToggle, OrderExecution, PositionCloser,
    PAUSE_MARKER_FILE,
};
use rg_notify::{AlertLimiter, Notifier};
use rg_risk::{
    aggregate, breach, drawdown, execution_lock, per_trade, AggregateReport, BreachReport, Clock,
    DrawdownReport, EngineContext, PerTradeMode, PerTradeReport,
};
use rg_schemas::AccountSnapshot;
use rg_state::StateStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::alerts::{
    self, KIND_DD_KILL, KIND_LIMITS, KIND_PAUSED, KIND_PER_TRADE, KIND_SNAPSHOT_STALE,
};

const MODULE_ENGINE: &str = "engine";
const MODULE_READER: &str = "reader";

/// Every venue capability the engine needs, behind one reference.
pub trait Venue: AccountSource + OrderExecution + AutomationToggle {}

impl<T: AccountSource + OrderExecution + AutomationToggle> Venue for T {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleError {
    pub module: String,
    pub error: String,
}

/// What one pass did. Modules that did not run are `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub paused: bool,
    pub snapshot_error: Option<String>,
    /// Consecutive snapshot failures after this pass.
    pub snapshot_fails: u32,
    pub lock_released: bool,
    pub per_trade: Option<PerTradeReport>,
    pub aggregate: Option<AggregateReport>,
    pub drawdown: Option<DrawdownReport>,
    pub breach: Option<BreachReport>,
    pub errors: Vec<ModuleError>,
}

impl TickReport {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            paused: false,
            snapshot_error: None,
            snapshot_fails: 0,
            lock_released: false,
            per_trade: None,
            aggregate: None,
            drawdown: None,
            breach: None,
            errors: Vec::new(),
        }
    }

    /// Any close attempted this pass, successful or not.
    pub fn closed_any(&self) -> bool {
        let pt = self
            .per_trade
            .as_ref()
            .map(|r| !r.closed.is_empty() || !r.failed.is_empty());
        let agg = self
            .aggregate
            .as_ref()
            .map(|r| !r.closed.is_empty() || !r.failed.is_empty());
        let dd = self
            .drawdown
            .as_ref()
            .map(|r| !r.closed.is_empty() || !r.failed.is_empty());
        [pt, agg, dd].into_iter().flatten().any(|b| b)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// How long the engine has been looking at the same pause marker.
#[derive(Debug, Default)]
struct PauseWatch {
    since: Option<DateTime<Utc>>,
    reported: bool,
}

/// One account, one venue. Holds the only cross-tick in-memory state (alert
/// spacing, snapshot failure count, pause watch); everything else lives in
/// the store.
pub struct Engine<'a> {
    cfg: &'a RiskGuardConfig,
    store: &'a StateStore,
    account: &'a dyn AccountSource,
    toggle: &'a dyn AutomationToggle,
    closer: PositionCloser<'a>,
    notifier: &'a dyn Notifier,
    logger: &'a dyn EventLogger,
    clock: &'a dyn Clock,
    limiter: AlertLimiter,
    snapshot_fails: u32,
    pause: PauseWatch,
}

impl<'a> Engine<'a> {
    pub fn new<V: Venue>(
        cfg: &'a RiskGuardConfig,
        store: &'a StateStore,
        venue: &'a V,
        notifier: &'a dyn Notifier,
        logger: &'a dyn EventLogger,
        clock: &'a dyn Clock,
    ) -> Self {
        let closer = PositionCloser::new(venue, venue, cfg.closer.clone())
            .with_pause_marker(store.dir().join(PAUSE_MARKER_FILE));
        Self {
            cfg,
            store,
            account: venue,
            toggle: venue,
            closer,
            notifier,
            logger,
            clock,
            limiter: alerts::build_limiter(&cfg.alerts),
            snapshot_fails: 0,
            pause: PauseWatch::default(),
        }
    }

    pub fn config(&self) -> &RiskGuardConfig {
        self.cfg
    }

    pub fn pause_marker(&self) -> PathBuf {
        self.store.dir().join(PAUSE_MARKER_FILE)
    }

    pub fn snapshot_fails(&self) -> u32 {
        self.snapshot_fails
    }

    /// Run `f` with the same context a tick uses. For operator commands
    /// (unlock) that must share the store, toggle and logger.
    pub fn with_context<R>(&self, f: impl FnOnce(&EngineContext<'_>) -> R) -> R {
        let ctx = EngineContext {
            store: self.store,
            closer: &self.closer,
            toggle: self.toggle,
            notifier: self.notifier,
            logger: self.logger,
            clock: self.clock,
        };
        f(&ctx)
    }

    /// One pass: lock maintenance, snapshot, then per-trade → aggregate →
    /// drawdown → breach. A failing module is recorded and the rest still run.
    pub fn tick(&mut self) -> Result<TickReport> {
        let ctx = EngineContext {
            store: self.store,
            closer: &self.closer,
            toggle: self.toggle,
            notifier: self.notifier,
            logger: self.logger,
            clock: self.clock,
        };
        let now = ctx.now();
        let mut report = TickReport::new(now);

        let marker = self.store.dir().join(PAUSE_MARKER_FILE);
        if hold_for_marker(&ctx, self.cfg, &mut self.pause, &mut self.limiter, &marker, &mut report) {
            report.paused = true;
            report.snapshot_fails = self.snapshot_fails;
            return Ok(report);
        }

        match execution_lock::maybe_release(&ctx) {
            Ok(released) => report.lock_released = released,
            Err(e) => record_error(&ctx, &mut report, execution_lock::MODULE, None, &e),
        }

        let snap = match self.account.snapshot() {
            Ok(s) => {
                self.snapshot_fails = 0;
                s
            }
            Err(e) => {
                self.snapshot_fails += 1;
                let max = self.cfg.run_loop.snapshot_max_fails;
                warn!(fails = self.snapshot_fails, max, error = %e, "snapshot failed");
                ctx.log(
                    "ERROR",
                    MODULE_READER,
                    None,
                    json!({ "err": e.to_string(), "stage": "snapshot", "fails": self.snapshot_fails }),
                );
                if self.snapshot_fails >= max {
                    let lines = vec![
                        format!("Account snapshot failed {} times in a row", self.snapshot_fails),
                        format!("Last error: {e}"),
                        "Rules are not being enforced until the venue answers again".to_string(),
                    ];
                    alerts::rate_limited(&mut self.limiter, self.notifier, KIND_SNAPSHOT_STALE, &lines, now);
                    self.snapshot_fails = 0;
                }
                report.snapshot_error = Some(e.to_string());
                report.snapshot_fails = self.snapshot_fails;
                return Ok(report);
            }
        };

        ctx.log(
            "HEARTBEAT",
            MODULE_ENGINE,
            Some(&snap.account),
            json!({ "equity": snap.equity(), "positions": snap.positions.len() }),
        );

        // 1) per-trade
        match per_trade::enforce(&ctx, &snap, &self.cfg.per_trade) {
            Ok(r) => {
                forward_per_trade(&ctx, &mut self.limiter, &snap, &r);
                report.per_trade = Some(r);
            }
            Err(e) => record_error(&ctx, &mut report, per_trade::MODULE, Some(&snap), &e),
        }

        // 2) aggregate
        match aggregate::enforce(&ctx, &snap, &self.cfg.aggregate) {
            Ok(r) => {
                forward_aggregate(&ctx, &mut self.limiter, &snap, &r);
                report.aggregate = Some(r);
            }
            Err(e) => record_error(&ctx, &mut report, aggregate::MODULE, Some(&snap), &e),
        }

        // 3) drawdown
        if self.cfg.drawdown.enabled {
            match drawdown::enforce(&ctx, &snap, &self.cfg.drawdown) {
                Ok(r) => {
                    forward_drawdown(&ctx, &mut self.limiter, &snap, &r);
                    report.drawdown = Some(r);
                }
                Err(e) => record_error(&ctx, &mut report, drawdown::MODULE, Some(&snap), &e),
            }
        }

        // 4) breach, last so it sees blocks engaged this pass. Positions
        // closed above must not count as opened while blocked.
        let snap = if report.closed_any() {
            match self.account.snapshot() {
                Ok(fresh) => fresh,
                Err(e) => {
                    let e = anyhow::anyhow!("refresh snapshot: {e}");
                    record_error(&ctx, &mut report, breach::MODULE, Some(&snap), &e);
                    report.snapshot_fails = self.snapshot_fails;
                    return Ok(report);
                }
            }
        } else {
            snap
        };
        match breach::detect_and_report(&ctx, &snap) {
            Ok(r) => report.breach = Some(r),
            Err(e) => record_error(&ctx, &mut report, breach::MODULE, Some(&snap), &e),
        }

        report.snapshot_fails = self.snapshot_fails;
        Ok(report)
    }
}

fn secs(v: f64) -> Duration {
    Duration::try_from_secs_f64(v).unwrap_or(Duration::ZERO)
}

/// `true` when the pass must be skipped for a close running elsewhere. A
/// marker held for `pause_stale_secs` (by file age or by how long this
/// engine has seen it) belongs to a dead closer and is removed.
fn hold_for_marker(
    ctx: &EngineContext<'_>,
    cfg: &RiskGuardConfig,
    watch: &mut PauseWatch,
    limiter: &mut AlertLimiter,
    marker: &Path,
    report: &mut TickReport,
) -> bool {
    let age = match marker_age(marker) {
        Ok(Some(age)) => age,
        Ok(None) => {
            *watch = PauseWatch::default();
            return false;
        }
        Err(e) => {
            record_error(ctx, report, MODULE_ENGINE, None, &e);
            return false;
        }
    };
    let now = ctx.now();
    let since = *watch.since.get_or_insert(now);
    let seen = (now - since).to_std().unwrap_or(Duration::ZERO);
    let held = age.max(seen);

    if held >= secs(cfg.run_loop.pause_stale_secs) {
        *watch = PauseWatch::default();
        match reclaim_marker(marker) {
            Ok(_) => {
                warn!(
                    held_secs = held.as_secs_f64(),
                    path = %marker.display(),
                    "stale pause marker reclaimed; enforcing"
                );
                ctx.log(
                    "PAUSE_MARKER_RECLAIMED",
                    MODULE_ENGINE,
                    None,
                    json!({ "held_secs": held.as_secs_f64(), "path": marker.display().to_string() }),
                );
                let lines = vec![
                    format!("Removed a pause marker left for {:.0}s", held.as_secs_f64()),
                    "A previous close did not finish cleanly; enforcement resumed".to_string(),
                ];
                alerts::rate_limited(limiter, ctx.notifier, KIND_PAUSED, &lines, now);
            }
            Err(e) => record_error(ctx, report, MODULE_ENGINE, None, &e),
        }
        return false;
    }

    warn!(held_secs = held.as_secs_f64(), "pause marker present; skipping tick");
    if !watch.reported && held >= secs(cfg.run_loop.pause_alert_secs) {
        watch.reported = true;
        ctx.log(
            "PAUSED",
            MODULE_ENGINE,
            None,
            json!({
                "held_secs": held.as_secs_f64(),
                "stale_after_secs": cfg.run_loop.pause_stale_secs,
            }),
        );
        let lines = vec![
            format!("Enforcement paused for {:.0}s by a close in progress", held.as_secs_f64()),
            format!(
                "The marker is removed after {:.0}s if it is not cleared",
                cfg.run_loop.pause_stale_secs
            ),
        ];
        alerts::rate_limited(limiter, ctx.notifier, KIND_PAUSED, &lines, now);
    }
    true
}

fn record_error(
    ctx: &EngineContext<'_>,
    report: &mut TickReport,
    module: &str,
    snap: Option<&AccountSnapshot>,
    e: &anyhow::Error,
) {
    error!(module, error = %format!("{e:#}"), "module failed");
    ctx.log(
        "ERROR",
        module,
        snap.map(|s| &s.account),
        json!({ "err": format!("{e:#}") }),
    );
    report.errors.push(ModuleError {
        module: module.to_string(),
        error: format!("{e:#}"),
    });
}

// ---------------------------------------------------------------------------
// Report forwarding
// ---------------------------------------------------------------------------

fn forward_per_trade(
    ctx: &EngineContext<'_>,
    limiter: &mut AlertLimiter,
    snap: &AccountSnapshot,
    r: &PerTradeReport,
) {
    if !r.notable() {
        return;
    }
    info!(
        mode = %r.mode,
        adjusted = r.adjusted.len(),
        closed = r.closed.len(),
        failed = r.failed.len(),
        adjust_failed = r.adjust_failed.len(),
        "per-trade enforcement"
    );
    ctx.log(KIND_PER_TRADE, per_trade::MODULE, Some(&snap.account), json!(r));
    if r.mode == PerTradeMode::Immediate {
        let lines = alerts::per_trade_lines(r, snap);
        alerts::rate_limited(limiter, ctx.notifier, KIND_PER_TRADE, &lines, ctx.now());
    }
}

fn forward_aggregate(
    ctx: &EngineContext<'_>,
    limiter: &mut AlertLimiter,
    snap: &AccountSnapshot,
    r: &AggregateReport,
) {
    if !r.changed() || r.cold_start {
        return;
    }
    info!(
        total_risk_pct = r.total_risk_pct,
        closed = r.closed.len(),
        attempts = r.attempts,
        blocked = r.blocked,
        "aggregate enforcement"
    );
    ctx.log(KIND_LIMITS, aggregate::MODULE, Some(&snap.account), json!(r));
    alerts::rate_limited(limiter, ctx.notifier, KIND_LIMITS, &alerts::aggregate_lines(r), ctx.now());
}

fn forward_drawdown(
    ctx: &EngineContext<'_>,
    limiter: &mut AlertLimiter,
    snap: &AccountSnapshot,
    r: &DrawdownReport,
) {
    if !(r.tripped_now || r.rearmed_until.is_some()) {
        return;
    }
    ctx.log(KIND_DD_KILL, drawdown::MODULE, Some(&snap.account), json!(r));
    if !r.failed.is_empty() {
        let lines = alerts::drawdown_failure_lines(r);
        alerts::rate_limited(limiter, ctx.notifier, KIND_DD_KILL, &lines, ctx.now());
    }
}
