//! Per-kind alert spacing and the summary lines the orchestrator forwards.

use chrono::{DateTime, Duration, Utc};
use rg_config::AlertsSection;
use rg_notify::{AlertLimiter, Notifier};
use rg_risk::{AggregateReport, CloseRecord, DrawdownReport, PerTradeReport};
use rg_schemas::AccountSnapshot;
use tracing::debug;

pub const KIND_PER_TRADE: &str = "PER_TRADE";
pub const KIND_LIMITS: &str = "LIMITS";
pub const KIND_DD_KILL: &str = "DD_KILL";
pub const KIND_SNAPSHOT_STALE: &str = "SNAPSHOT_STALE";
pub const KIND_PAUSED: &str = "PAUSED";

/// Closes listed individually in one alert; the rest are summarised.
const MAX_LISTED: usize = 5;

fn secs(v: f64) -> Duration {
    Duration::milliseconds((v * 1000.0).round() as i64)
}

pub fn build_limiter(cfg: &AlertsSection) -> AlertLimiter {
    cfg.min_interval_secs.iter().fold(
        AlertLimiter::new(secs(cfg.default_interval_secs)),
        |lim, (kind, v)| lim.with_kind(kind, secs(*v)),
    )
}

/// Send unless an alert of the same kind went out too recently. Returns
/// whether the notifier accepted it.
pub fn rate_limited(
    limiter: &mut AlertLimiter,
    notifier: &dyn Notifier,
    kind: &str,
    lines: &[String],
    now: DateTime<Utc>,
) -> bool {
    if !limiter.allow(kind, now) {
        debug!(kind, "alert suppressed by rate limit");
        return false;
    }
    notifier.notify(kind, lines)
}

fn close_line(c: &CloseRecord, reason: &str) -> String {
    let mark = if c.ok { "closed" } else { "FAILED" };
    format!("{mark} {} #{} ({reason})", c.symbol, c.ticket)
}

fn push_closes<'r>(lines: &mut Vec<String>, closes: impl Iterator<Item = (&'r CloseRecord, String)>) {
    let all: Vec<_> = closes.collect();
    for (c, reason) in all.iter().take(MAX_LISTED) {
        lines.push(close_line(c, reason));
    }
    if all.len() > MAX_LISTED {
        lines.push(format!("... and {} more", all.len() - MAX_LISTED));
    }
}

/// Immediate-mode closes. Interactive mode talks to the operator itself.
pub fn per_trade_lines(r: &PerTradeReport, snap: &AccountSnapshot) -> Vec<String> {
    let reason = |t| match snap.position(t) {
        Some(p) if p.missing_sl() => "no stop-loss".to_string(),
        Some(p) => format!("risk {:.2}%", p.risk_pct.unwrap_or(0.0)),
        None => "over limit".to_string(),
    };
    let mut lines = vec![format!("Per-trade limit {:.2}%", r.max_risk_pct)];
    push_closes(
        &mut lines,
        r.closed.iter().chain(r.failed.iter()).map(|c| (c, reason(c.ticket))),
    );
    lines
}

pub fn aggregate_lines(r: &AggregateReport) -> Vec<String> {
    let mut lines = Vec::new();
    push_closes(
        &mut lines,
        r.closed
            .iter()
            .chain(r.failed.iter())
            .map(|c| (c, format!("aggregate limit {:.2}%", r.threshold_pct))),
    );
    lines.push(format!(
        "Total risk {:.2}% (limit {:.2}%)",
        r.total_risk_pct, r.threshold_pct
    ));
    lines.push(format!("Attempts {}/{}", r.attempts, r.max_attempts));
    if r.blocked {
        lines.push("RISK BLOCK ACTIVE".to_string());
    }
    lines
}

/// Only positions the kill switch could not flatten; the trip itself is
/// announced by the drawdown module.
pub fn drawdown_failure_lines(r: &DrawdownReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Drawdown {:.2}%: {} position(s) could not be closed",
        r.dd_pct,
        r.failed.len()
    )];
    push_closes(&mut lines, r.failed.iter().map(|c| (c, "drawdown kill".to_string())));
    lines
}
