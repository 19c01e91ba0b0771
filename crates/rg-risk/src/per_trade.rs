//! Per-trade enforcer.
//!
//! A violation is a position with no stop-loss, or whose stop-loss risks more
//! than `max_risk_pct` of equity. Immediate mode closes violations outright.
//! Interactive mode pulls the stop-loss in to exactly the limit and asks the
//! operator whether to restore the original ("1") or keep the new one ("2").

use crate::context::{close_all, CloseRecord, EngineContext};
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use rg_notify::{decision_token, Cursor, Poll};
use rg_schemas::{stop_loss_for_risk, AccountSnapshot, Position, Side, Ticket};
use rg_state::{docs, StateStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const MODULE: &str = "per_trade";
pub const CLOSE_COMMENT: &str = "RG per-trade";
pub const ADJUST_COMMENT: &str = "RG ajusta SL";
pub const RESTORE_COMMENT: &str = "RG override SL original";

/// Replies stamped this much before the prompt still count.
const REPLY_GRACE_SECS: i64 = 1;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerTradeMode {
    Immediate,
    #[default]
    Interactive,
}

impl fmt::Display for PerTradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerTradeMode::Immediate => write!(f, "immediate"),
            PerTradeMode::Interactive => write!(f, "interactive"),
        }
    }
}

impl FromStr for PerTradeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(PerTradeMode::Immediate),
            "interactive" => Ok(PerTradeMode::Interactive),
            other => bail!("unknown per-trade mode '{other}' (expected immediate|interactive)"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerTradeConfig {
    pub max_risk_pct: f64,
    pub mode: PerTradeMode,
    pub decision_timeout_min: i64,
}

impl Default for PerTradeConfig {
    fn default() -> Self {
        Self {
            max_risk_pct: 1.0,
            mode: PerTradeMode::Interactive,
            decision_timeout_min: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted decision state
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Override,
    Keep,
    Timeout,
    AdjustFailed,
}

impl DecisionStatus {
    /// The operator has decided; automatic adjustment stays off until the position closes.
    pub fn suspends_adjustment(self) -> bool {
        matches!(self, DecisionStatus::Override | DecisionStatus::Keep)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketDecision {
    pub ticket: Ticket,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub digits: u32,
    pub risk_pct_detected: Option<f64>,
    pub limit_pct: f64,
    pub sl_original: Option<f64>,
    pub tp_original: Option<f64>,
    #[serde(default)]
    pub sl_adjusted: Option<f64>,
    pub status: DecisionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub prompt_sent: bool,
    #[serde(default)]
    pub prompted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deadline_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub adjusted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub adjust_failed_reason: Option<String>,
}

impl TicketDecision {
    fn detected(pos: &Position, limit_pct: f64, status: DecisionStatus, now: DateTime<Utc>) -> Self {
        Self {
            ticket: pos.ticket,
            symbol: pos.symbol.clone(),
            side: pos.side,
            volume: pos.volume,
            digits: pos.symbol_info.as_ref().map(|i| i.digits).unwrap_or(5),
            risk_pct_detected: pos.risk_pct,
            limit_pct,
            sl_original: pos.stop_loss(),
            tp_original: pos.take_profit(),
            sl_adjusted: None,
            status,
            created_at: now,
            prompt_sent: false,
            prompted_at: None,
            deadline_at: None,
            decided_at: None,
            adjusted_at: None,
            adjust_failed_reason: None,
        }
    }

    fn card(&self) -> Vec<String> {
        let risk = match self.risk_pct_detected {
            Some(r) => format!("{r:.2}%"),
            None => "no stop-loss".to_string(),
        };
        vec![
            format!(
                "{} #{} {} {:.2} lots",
                self.symbol, self.ticket, self.side, self.volume
            ),
            format!("Risk detected: {risk} (limit {:.2}%)", self.limit_pct),
            format!("SL original: {}", fmt_price(self.sl_original, self.digits)),
            format!("SL adjusted: {}", fmt_price(self.sl_adjusted, self.digits)),
        ]
    }
}

fn fmt_price(level: Option<f64>, digits: u32) -> String {
    match level {
        Some(v) if v != 0.0 => format!("{v:.prec$}", prec = digits as usize),
        _ => "-".to_string(),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerTradeState {
    /// Position in the notifier's inbound stream. `None` until the first prompt.
    pub decision_cursor: Option<Cursor>,
    pub tickets: BTreeMap<Ticket, TicketDecision>,
}

pub fn status(store: &StateStore) -> PerTradeState {
    store.load(docs::PER_TRADE)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdjustedStop {
    pub ticket: Ticket,
    pub symbol: String,
    pub sl: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdjustFailure {
    pub ticket: Ticket,
    pub symbol: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerTradeReport {
    pub mode: PerTradeMode,
    pub equity: f64,
    pub max_risk_pct: f64,
    pub violations: Vec<Ticket>,
    // immediate mode
    pub closed: Vec<CloseRecord>,
    pub failed: Vec<CloseRecord>,
    // interactive mode
    pub adjusted: Vec<AdjustedStop>,
    pub overridden: Vec<Ticket>,
    pub kept: Vec<Ticket>,
    pub timed_out: Vec<Ticket>,
    pub adjust_failed: Vec<AdjustFailure>,
    pub restore_failed: Vec<AdjustFailure>,
    pub pending: BTreeSet<Ticket>,
}

impl PerTradeReport {
    fn new(mode: PerTradeMode, equity: f64, max_risk_pct: f64) -> Self {
        Self {
            mode,
            equity,
            max_risk_pct,
            violations: Vec::new(),
            closed: Vec::new(),
            failed: Vec::new(),
            adjusted: Vec::new(),
            overridden: Vec::new(),
            kept: Vec::new(),
            timed_out: Vec::new(),
            adjust_failed: Vec::new(),
            restore_failed: Vec::new(),
            pending: BTreeSet::new(),
        }
    }

    /// Something happened this tick (an open `pending` alone is not news).
    pub fn notable(&self) -> bool {
        !self.closed.is_empty()
            || !self.failed.is_empty()
            || !self.adjusted.is_empty()
            || !self.overridden.is_empty()
            || !self.kept.is_empty()
            || !self.timed_out.is_empty()
            || !self.adjust_failed.is_empty()
            || !self.restore_failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Enforcement
// ---------------------------------------------------------------------------

pub fn enforce(
    ctx: &EngineContext<'_>,
    snap: &AccountSnapshot,
    cfg: &PerTradeConfig,
) -> Result<PerTradeReport> {
    match cfg.mode {
        PerTradeMode::Immediate => Ok(enforce_immediate(ctx, snap, cfg)),
        PerTradeMode::Interactive => enforce_interactive(ctx, snap, cfg),
    }
}

fn enforce_immediate(
    ctx: &EngineContext<'_>,
    snap: &AccountSnapshot,
    cfg: &PerTradeConfig,
) -> PerTradeReport {
    let mut report = PerTradeReport::new(PerTradeMode::Immediate, snap.equity(), cfg.max_risk_pct);
    let violating: Vec<&Position> = snap
        .positions
        .iter()
        .filter(|p| p.violates(cfg.max_risk_pct))
        .collect();
    report.violations = violating.iter().map(|p| p.ticket).collect();
    let (closed, failed) = close_all(ctx, violating, CLOSE_COMMENT);
    report.closed = closed;
    report.failed = failed;
    report
}

/// Interactive cycle in three stages. Decisions and intents (prompt sent,
/// target stop-loss) are committed under the state lock first; the venue and
/// the notifier are only touched once that write has landed; failures are
/// written back in a second locked update.
fn enforce_interactive(
    ctx: &EngineContext<'_>,
    snap: &AccountSnapshot,
    cfg: &PerTradeConfig,
) -> Result<PerTradeReport> {
    let now = ctx.now();
    let mut report =
        PerTradeReport::new(PerTradeMode::Interactive, snap.equity(), cfg.max_risk_pct);

    // Channel reads only; the cursor they yield is applied under the lock.
    let peek: PerTradeState = ctx.store.load(docs::PER_TRADE);
    let inbox = poll_for_listener(ctx, &peek);
    let head = if peek.decision_cursor.is_none()
        && snap.positions.iter().any(|p| p.violates(cfg.max_risk_pct))
    {
        channel_head(ctx)
    } else {
        None
    };

    let steps = ctx.store.update(docs::PER_TRADE, |st: &mut PerTradeState| {
        plan(st, snap, cfg, now, inbox.as_ref(), head, &mut report)
    })?;

    let mut outcomes = Vec::new();
    for step in steps {
        run_step(ctx, step, cfg, &mut report, &mut outcomes);
    }

    report.pending = ctx.store.update(docs::PER_TRADE, |st: &mut PerTradeState| {
        for outcome in &outcomes {
            outcome.record(st);
        }
        st.tickets
            .values()
            .filter(|e| e.status == DecisionStatus::Pending)
            .map(|e| e.ticket)
            .collect::<BTreeSet<_>>()
    })?;
    Ok(report)
}

/// Replies read before the lock, tagged with the cursor they were read from.
struct Inbox {
    from: Option<Cursor>,
    poll: Poll,
}

/// Side effect decided under the state lock.
enum Step {
    Kept {
        entry: TicketDecision,
        no_original: bool,
    },
    Restore(TicketDecision),
    TimedOut(TicketDecision),
    AdjustFailed {
        entry: TicketDecision,
        reason: String,
    },
    Adjust {
        prior: Option<TicketDecision>,
        entry: TicketDecision,
        target: f64,
        tp: Option<f64>,
        risk_pct: Option<f64>,
        prompt: bool,
    },
}

/// A step the venue refused; rolls the optimistic intent back.
enum Outcome {
    RestoreFailed(Ticket),
    AdjustFailed {
        ticket: Ticket,
        prior: Option<TicketDecision>,
        reason: String,
    },
}

impl Outcome {
    fn record(&self, st: &mut PerTradeState) {
        match self {
            Outcome::RestoreFailed(ticket) => {
                if let Some(e) = st.tickets.get_mut(ticket) {
                    if e.status == DecisionStatus::Override {
                        e.status = DecisionStatus::Pending;
                        e.decided_at = None;
                    }
                }
            }
            Outcome::AdjustFailed {
                ticket,
                prior,
                reason,
            } => {
                let Some(e) = st.tickets.get_mut(ticket) else {
                    return;
                };
                match prior {
                    Some(p) => *e = p.clone(),
                    None => {
                        e.prompt_sent = false;
                        e.prompted_at = None;
                        e.deadline_at = None;
                        e.sl_adjusted = None;
                        e.adjusted_at = None;
                    }
                }
                note_adjust_failed(e, reason.clone());
            }
        }
    }
}

fn listening_ticket(st: &PerTradeState) -> Option<Ticket> {
    st.tickets
        .values()
        .filter(|e| e.status == DecisionStatus::Pending && e.prompt_sent)
        .max_by_key(|e| e.prompted_at)
        .map(|e| e.ticket)
}

fn poll_for_listener(ctx: &EngineContext<'_>, peek: &PerTradeState) -> Option<Inbox> {
    listening_ticket(peek)?;
    match ctx.notifier.poll_decisions(peek.decision_cursor) {
        Ok(poll) => Some(Inbox {
            from: peek.decision_cursor,
            poll,
        }),
        Err(e) => {
            warn!(error = %e, "decision poll failed");
            None
        }
    }
}

/// Skip everything already in the channel so stale "1"/"2" replies never apply.
fn channel_head(ctx: &EngineContext<'_>) -> Option<Cursor> {
    match ctx.notifier.poll_decisions(None) {
        Ok(p) => p.next_cursor,
        Err(e) => {
            warn!(error = %e, "decision cursor sync failed");
            None
        }
    }
}

fn plan(
    st: &mut PerTradeState,
    snap: &AccountSnapshot,
    cfg: &PerTradeConfig,
    now: DateTime<Utc>,
    inbox: Option<&Inbox>,
    head: Option<Cursor>,
    report: &mut PerTradeReport,
) -> Vec<Step> {
    let open = snap.tickets();
    st.tickets.retain(|t, _| open.contains(t));

    let mut steps = Vec::new();
    if let Some(inbox) = inbox {
        take_decision(st, inbox, now, &mut steps);
    }
    expire_pending(st, now, &mut steps);
    for pos in &snap.positions {
        plan_adjustment(st, pos, snap.equity(), cfg, now, head, report, &mut steps);
    }
    steps
}

/// Only the most recently prompted pending ticket listens for a reply.
fn take_decision(
    st: &mut PerTradeState,
    inbox: &Inbox,
    now: DateTime<Utc>,
    steps: &mut Vec<Step>,
) {
    // Another instance consumed these replies in between.
    if st.decision_cursor != inbox.from {
        return;
    }
    let Some(ticket) = listening_ticket(st) else {
        return;
    };
    if let Some(next) = inbox.poll.next_cursor {
        st.decision_cursor = Some(next);
    }

    let Some(entry) = st.tickets.get_mut(&ticket) else {
        return;
    };
    let not_before = entry
        .prompted_at
        .map(|p| p - Duration::seconds(REPLY_GRACE_SECS));
    let decision = inbox
        .poll
        .messages
        .iter()
        .filter(|m| !m.from_bot)
        .filter(|m| not_before.map_or(true, |t| m.ts >= t))
        .filter_map(|m| decision_token(&m.text))
        .last();

    match decision {
        Some(1) if entry.sl_original.is_none() => {
            entry.status = DecisionStatus::Keep;
            entry.decided_at = Some(now);
            steps.push(Step::Kept {
                entry: entry.clone(),
                no_original: true,
            });
        }
        Some(1) => {
            // Recorded before the restore is sent; a refused restore reverts it.
            entry.status = DecisionStatus::Override;
            entry.decided_at = Some(now);
            steps.push(Step::Restore(entry.clone()));
        }
        Some(2) => {
            entry.status = DecisionStatus::Keep;
            entry.decided_at = Some(now);
            steps.push(Step::Kept {
                entry: entry.clone(),
                no_original: false,
            });
        }
        _ => {}
    }
}

fn expire_pending(st: &mut PerTradeState, now: DateTime<Utc>, steps: &mut Vec<Step>) {
    for entry in st.tickets.values_mut() {
        if entry.status != DecisionStatus::Pending {
            continue;
        }
        let Some(deadline) = entry.deadline_at else {
            continue;
        };
        if now <= deadline {
            continue;
        }
        entry.status = DecisionStatus::Timeout;
        steps.push(Step::TimedOut(entry.clone()));
    }
}

#[allow(clippy::too_many_arguments)]
fn plan_adjustment(
    st: &mut PerTradeState,
    pos: &Position,
    equity: f64,
    cfg: &PerTradeConfig,
    now: DateTime<Utc>,
    head: Option<Cursor>,
    report: &mut PerTradeReport,
    steps: &mut Vec<Step>,
) {
    if st
        .tickets
        .get(&pos.ticket)
        .is_some_and(|e| e.status.suspends_adjustment())
    {
        return;
    }
    if !pos.violates(cfg.max_risk_pct) {
        return;
    }
    report.violations.push(pos.ticket);

    let first_prompt = st.tickets.get(&pos.ticket).map_or(true, |e| !e.prompt_sent);
    if first_prompt && st.decision_cursor.is_none() {
        if let Some(head) = head {
            debug!(head, "decision cursor synced to channel head");
            st.decision_cursor = Some(head);
        }
    }

    let target = match stop_loss_for_risk(pos, equity, cfg.max_risk_pct) {
        Ok(level) => level,
        Err(e) => {
            let entry = st.tickets.entry(pos.ticket).or_insert_with(|| {
                TicketDecision::detected(pos, cfg.max_risk_pct, DecisionStatus::AdjustFailed, now)
            });
            if let Some(reason) = note_adjust_failed(entry, e.to_string()) {
                steps.push(Step::AdjustFailed {
                    entry: entry.clone(),
                    reason,
                });
            }
            return;
        }
    };

    let half_point = pos
        .symbol_info
        .as_ref()
        .map(|i| i.half_point())
        .unwrap_or(1e-9);
    if let Some(live) = pos.stop_loss() {
        if (live - target).abs() <= half_point {
            debug!(ticket = pos.ticket, live, target, "stop-loss already at target");
            return;
        }
    }

    let prior = st.tickets.get(&pos.ticket).cloned();
    let entry = st.tickets.entry(pos.ticket).or_insert_with(|| {
        TicketDecision::detected(pos, cfg.max_risk_pct, DecisionStatus::Pending, now)
    });
    let prompt = !entry.prompt_sent;
    if prompt {
        entry.prompt_sent = true;
        entry.prompted_at = Some(now);
        entry.deadline_at = Some(now + Duration::minutes(cfg.decision_timeout_min));
    }
    entry.status = DecisionStatus::Pending;
    entry.sl_adjusted = Some(target);
    entry.adjusted_at = Some(now);
    entry.adjust_failed_reason = None;

    steps.push(Step::Adjust {
        prior,
        entry: entry.clone(),
        target,
        tp: pos.take_profit(),
        risk_pct: pos.risk_pct,
        prompt,
    });
}

/// Marks the entry failed. Returns the reason only the first time, so a
/// ticket is reported once rather than on every pass.
fn note_adjust_failed(entry: &mut TicketDecision, reason: String) -> Option<String> {
    if entry.status == DecisionStatus::AdjustFailed && entry.adjust_failed_reason.is_some() {
        return None;
    }
    entry.status = DecisionStatus::AdjustFailed;
    entry.adjust_failed_reason = Some(reason.clone());
    Some(reason)
}

fn run_step(
    ctx: &EngineContext<'_>,
    step: Step,
    cfg: &PerTradeConfig,
    report: &mut PerTradeReport,
    outcomes: &mut Vec<Outcome>,
) {
    match step {
        Step::Kept { entry, no_original } => {
            report.kept.push(entry.ticket);
            let mut lines = entry.card();
            if no_original {
                info!(ticket = entry.ticket, "option 1 unavailable without an original stop-loss; keeping adjusted");
                lines.push("There was no original stop-loss to restore.".to_string());
                lines.push("Keeping the adjusted stop-loss.".to_string());
                ctx.notify("SL_OPTION_UNAVAILABLE", lines);
                ctx.log(
                    "PER_TRADE_KEEP_ADJUSTED",
                    MODULE,
                    None,
                    json!({ "ticket": entry.ticket, "symbol": entry.symbol, "sl_adjusted": entry.sl_adjusted, "reason": "no_original_sl" }),
                );
            } else {
                info!(ticket = entry.ticket, "adjusted stop-loss confirmed");
                lines.push("Confirmed: keeping the adjusted stop-loss.".to_string());
                ctx.notify("SL_KEPT", lines);
                ctx.log(
                    "PER_TRADE_KEEP_ADJUSTED",
                    MODULE,
                    None,
                    json!({ "ticket": entry.ticket, "symbol": entry.symbol, "sl_adjusted": entry.sl_adjusted }),
                );
            }
        }
        Step::Restore(entry) => {
            let out = ctx.closer.modify_sltp(
                entry.ticket,
                &entry.symbol,
                entry.sl_original,
                entry.tp_original,
                RESTORE_COMMENT,
            );
            let mut lines = entry.card();
            if out.ok {
                report.overridden.push(entry.ticket);
                info!(ticket = entry.ticket, "original stop-loss restored; override until close");
                lines.push("Override active until the position closes.".to_string());
                lines.push("Original stop-loss restored.".to_string());
                ctx.notify("SL_OVERRIDE", lines);
                ctx.log(
                    "PER_TRADE_OVERRIDE",
                    MODULE,
                    None,
                    json!({ "ticket": entry.ticket, "symbol": entry.symbol, "sl_original": entry.sl_original, "path": out.path }),
                );
            } else {
                warn!(ticket = entry.ticket, detail = %out.detail, "restoring original stop-loss failed");
                report.restore_failed.push(AdjustFailure {
                    ticket: entry.ticket,
                    symbol: entry.symbol.clone(),
                    reason: out.detail.clone(),
                });
                outcomes.push(Outcome::RestoreFailed(entry.ticket));
                lines.push(format!("Restoring the original stop-loss failed: {}", out.detail));
                lines.push("Adjust it manually on the venue.".to_string());
                ctx.notify("SL_OVERRIDE_FAILED", lines);
            }
        }
        Step::TimedOut(entry) => {
            report.timed_out.push(entry.ticket);
            info!(ticket = entry.ticket, "decision window elapsed; adjusted stop-loss stays");
            let mut lines = entry.card();
            lines.push(format!(
                "No reply within {} min: keeping the adjusted stop-loss.",
                cfg.decision_timeout_min
            ));
            ctx.notify("SL_TIMEOUT", lines);
            ctx.log(
                "PER_TRADE_TIMEOUT",
                MODULE,
                None,
                json!({ "ticket": entry.ticket, "symbol": entry.symbol, "sl_adjusted": entry.sl_adjusted }),
            );
        }
        Step::AdjustFailed { entry, reason } => {
            announce_adjust_failed(ctx, &entry, &reason, report);
        }
        Step::Adjust {
            prior,
            entry,
            target,
            tp,
            risk_pct,
            prompt,
        } => {
            let out = ctx.closer.modify_sltp(
                entry.ticket,
                &entry.symbol,
                Some(target),
                tp,
                ADJUST_COMMENT,
            );
            if !out.ok {
                let already_reported = prior.as_ref().is_some_and(|p| {
                    p.status == DecisionStatus::AdjustFailed && p.adjust_failed_reason.is_some()
                });
                if !already_reported {
                    let mut shown = entry.clone();
                    shown.sl_adjusted = prior.as_ref().and_then(|p| p.sl_adjusted);
                    announce_adjust_failed(ctx, &shown, &out.detail, report);
                }
                outcomes.push(Outcome::AdjustFailed {
                    ticket: entry.ticket,
                    prior,
                    reason: out.detail,
                });
                return;
            }

            report.adjusted.push(AdjustedStop {
                ticket: entry.ticket,
                symbol: entry.symbol.clone(),
                sl: target,
            });

            if !prompt {
                info!(ticket = entry.ticket, sl = target, "stop-loss re-applied");
                ctx.log(
                    "PER_TRADE_REAPPLY_SL",
                    MODULE,
                    None,
                    json!({ "ticket": entry.ticket, "symbol": entry.symbol, "sl_adjusted": target, "path": out.path }),
                );
                return;
            }

            info!(ticket = entry.ticket, sl = target, "stop-loss adjusted; awaiting decision");
            let mut lines = entry.card();
            lines.push("What do you want to do?".to_string());
            if entry.sl_original.is_some() {
                lines.push("1 = keep the original stop-loss (override until close)".to_string());
            } else {
                lines.push("1 = unavailable (there was no original stop-loss)".to_string());
            }
            lines.push("2 = keep the adjusted stop-loss (recommended)".to_string());
            lines.push(format!(
                "Reply with 1 or 2 only ({} min).",
                cfg.decision_timeout_min
            ));
            ctx.notify("SL_ADJUSTED", lines);
            ctx.log(
                "PER_TRADE_ADJUSTED",
                MODULE,
                None,
                json!({
                    "ticket": entry.ticket,
                    "symbol": entry.symbol,
                    "risk_pct": risk_pct,
                    "limit_pct": cfg.max_risk_pct,
                    "sl_original": entry.sl_original,
                    "sl_adjusted": target,
                    "deadline_at": entry.deadline_at,
                    "path": out.path,
                }),
            );
        }
    }
}

fn announce_adjust_failed(
    ctx: &EngineContext<'_>,
    entry: &TicketDecision,
    reason: &str,
    report: &mut PerTradeReport,
) {
    warn!(ticket = entry.ticket, %reason, "stop-loss adjustment failed");
    report.adjust_failed.push(AdjustFailure {
        ticket: entry.ticket,
        symbol: entry.symbol.clone(),
        reason: reason.to_string(),
    });
    let mut lines = entry.card();
    lines.push(format!("Could not adjust the stop-loss automatically: {reason}"));
    lines.push("Adjust it manually on the venue.".to_string());
    ctx.notify("SL_ADJUST_FAILED", lines);
    ctx.log(
        "PER_TRADE_ADJUST_FAILED",
        MODULE,
        None,
        json!({
            "ticket": entry.ticket,
            "symbol": entry.symbol,
            "risk_pct": entry.risk_pct_detected,
            "limit_pct": entry.limit_pct,
            "reason": reason,
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Immediate".parse::<PerTradeMode>().unwrap(), PerTradeMode::Immediate);
        assert_eq!(" interactive ".parse::<PerTradeMode>().unwrap(), PerTradeMode::Interactive);
        assert!("strict".parse::<PerTradeMode>().is_err());
    }

    #[test]
    fn only_operator_decisions_suspend_adjustment() {
        assert!(DecisionStatus::Override.suspends_adjustment());
        assert!(DecisionStatus::Keep.suspends_adjustment());
        assert!(!DecisionStatus::Pending.suspends_adjustment());
        assert!(!DecisionStatus::Timeout.suspends_adjustment());
        assert!(!DecisionStatus::AdjustFailed.suspends_adjustment());
    }

    #[test]
    fn price_formatting_follows_digits() {
        assert_eq!(fmt_price(Some(1.2), 5), "1.20000");
        assert_eq!(fmt_price(Some(0.0), 5), "-");
        assert_eq!(fmt_price(None, 2), "-");
    }
}
