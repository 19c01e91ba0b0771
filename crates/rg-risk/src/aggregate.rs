//! Aggregate risk limiter.
//!
//! While total stop-loss exposure is within the threshold the current ticket
//! set is the accepted baseline. Above it, every ticket outside the baseline
//! is closed, and `blocked` latches once enough close attempts pile up. Only
//! a tick back within the threshold clears the block.

use crate::context::{close_all, CloseRecord, EngineContext};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rg_schemas::{AccountSnapshot, Ticket, PCT_EPSILON};
use rg_state::{docs, StateStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{info, warn};

pub const MODULE: &str = "aggregate";
pub const CLOSE_COMMENT: &str = "RG aggblock";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub max_risk_pct: f64,
    pub max_attempts: u32,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            max_risk_pct: 5.0,
            max_attempts: 3,
        }
    }
}

/// Persisted limiter state for one account.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateState {
    /// Set once a baseline has been captured for `account_login`. An empty
    /// baseline is a valid baseline.
    pub initialized: bool,
    pub account_login: Option<u64>,
    pub baseline_tickets: BTreeSet<Ticket>,
    pub attempts: u32,
    pub blocked: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// What one evaluation decided. `new_violations` still need closing.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateDecision {
    pub cold_start: bool,
    pub within_limit: bool,
    pub new_violations: Vec<Ticket>,
    pub attempts_before: u32,
    pub attempts: u32,
    pub blocked_before: bool,
    pub blocked: bool,
}

// ---------------------------------------------------------------------------
// Pure transition
// ---------------------------------------------------------------------------

pub fn evaluate(
    cfg: &AggregateConfig,
    st: &mut AggregateState,
    login: u64,
    tickets: &BTreeSet<Ticket>,
    total_risk_pct: f64,
    now: DateTime<Utc>,
) -> AggregateDecision {
    let attempts_before = st.attempts;
    let blocked_before = st.blocked;
    st.updated_at = Some(now);

    if !st.initialized || st.account_login != Some(login) {
        *st = AggregateState {
            initialized: true,
            account_login: Some(login),
            baseline_tickets: tickets.clone(),
            attempts: 0,
            blocked: false,
            updated_at: Some(now),
        };
        return AggregateDecision {
            cold_start: true,
            within_limit: total_risk_pct <= cfg.max_risk_pct + PCT_EPSILON,
            new_violations: Vec::new(),
            attempts_before,
            attempts: 0,
            blocked_before,
            blocked: false,
        };
    }

    if total_risk_pct <= cfg.max_risk_pct + PCT_EPSILON {
        st.baseline_tickets = tickets.clone();
        st.attempts = 0;
        st.blocked = false;
        return AggregateDecision {
            cold_start: false,
            within_limit: true,
            new_violations: Vec::new(),
            attempts_before,
            attempts: 0,
            blocked_before,
            blocked: false,
        };
    }

    let new_violations: Vec<Ticket> = tickets
        .difference(&st.baseline_tickets)
        .copied()
        .collect();
    st.attempts = st.attempts.saturating_add(new_violations.len() as u32);
    if st.attempts >= cfg.max_attempts {
        st.blocked = true;
    }

    AggregateDecision {
        cold_start: false,
        within_limit: false,
        new_violations,
        attempts_before,
        attempts: st.attempts,
        blocked_before,
        blocked: st.blocked,
    }
}

// ---------------------------------------------------------------------------
// Enforcement
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub total_risk_pct: f64,
    pub threshold_pct: f64,
    pub cold_start: bool,
    pub new_violations: Vec<Ticket>,
    pub closed: Vec<CloseRecord>,
    pub failed: Vec<CloseRecord>,
    pub attempts_before: u32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub blocked_before: bool,
    pub blocked: bool,
}

impl AggregateReport {
    /// Anything worth an event line: closes, counter movement, block edges.
    pub fn changed(&self) -> bool {
        !self.new_violations.is_empty()
            || !self.closed.is_empty()
            || !self.failed.is_empty()
            || self.attempts != self.attempts_before
            || self.blocked != self.blocked_before
    }
}

pub fn enforce(
    ctx: &EngineContext<'_>,
    snap: &AccountSnapshot,
    cfg: &AggregateConfig,
) -> Result<AggregateReport> {
    let exposure = snap.exposure();
    let tickets = snap.tickets();
    let now = ctx.now();

    let d = ctx.store.update(docs::AGGREGATE, |st: &mut AggregateState| {
        evaluate(cfg, st, snap.account.login, &tickets, exposure.total_risk_pct, now)
    })?;

    if d.cold_start {
        info!(
            login = snap.account.login,
            baseline = tickets.len(),
            "aggregate baseline captured"
        );
    }

    let targets = d
        .new_violations
        .iter()
        .filter_map(|t| snap.position(*t));
    let (closed, failed) = close_all(ctx, targets, CLOSE_COMMENT);
    for f in &failed {
        warn!(ticket = f.ticket, detail = %f.detail, "aggregate close failed");
    }

    let report = AggregateReport {
        total_risk_pct: exposure.total_risk_pct,
        threshold_pct: cfg.max_risk_pct,
        cold_start: d.cold_start,
        new_violations: d.new_violations,
        closed,
        failed,
        attempts_before: d.attempts_before,
        attempts: d.attempts,
        max_attempts: cfg.max_attempts,
        blocked_before: d.blocked_before,
        blocked: d.blocked,
    };

    if report.blocked != report.blocked_before && !report.cold_start {
        announce_block_edge(ctx, snap, &report);
    }
    Ok(report)
}

fn announce_block_edge(ctx: &EngineContext<'_>, snap: &AccountSnapshot, r: &AggregateReport) {
    let action = if r.blocked { "engaged" } else { "cleared" };
    info!(action, attempts = r.attempts, total_risk_pct = r.total_risk_pct, "aggregate risk block");
    ctx.log(
        "RISK_BLOCK",
        MODULE,
        Some(&snap.account),
        json!({
            "action": action,
            "attempts": r.attempts,
            "max_attempts": r.max_attempts,
            "total_risk_pct": r.total_risk_pct,
            "threshold_pct": r.threshold_pct,
        }),
    );
    ctx.notify(
        "RISK_BLOCK",
        vec![
            format!("Aggregate risk block {action}"),
            format!(
                "Total risk {:.2}% (limit {:.2}%)",
                r.total_risk_pct, r.threshold_pct
            ),
            format!("Attempts {}/{}", r.attempts, r.max_attempts),
        ],
    );
}

pub fn status(store: &StateStore) -> AggregateState {
    store.load(docs::AGGREGATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ts: &[Ticket]) -> BTreeSet<Ticket> {
        ts.iter().copied().collect()
    }

    fn cfg() -> AggregateConfig {
        AggregateConfig {
            max_risk_pct: 5.0,
            max_attempts: 3,
        }
    }

    #[test]
    fn first_observation_captures_baseline_without_violations() {
        let mut st = AggregateState::default();
        let d = evaluate(&cfg(), &mut st, 7, &set(&[1, 2]), 9.0, Utc::now());
        assert!(d.cold_start);
        assert!(d.new_violations.is_empty());
        assert_eq!(st.baseline_tickets, set(&[1, 2]));
        assert!(st.initialized);
    }

    #[test]
    fn empty_baseline_is_not_recaptured() {
        let mut st = AggregateState::default();
        evaluate(&cfg(), &mut st, 7, &set(&[]), 0.0, Utc::now());
        let d = evaluate(&cfg(), &mut st, 7, &set(&[5]), 9.0, Utc::now());
        assert!(!d.cold_start);
        assert_eq!(d.new_violations, vec![5]);
    }

    #[test]
    fn login_change_starts_over() {
        let mut st = AggregateState::default();
        evaluate(&cfg(), &mut st, 7, &set(&[1]), 1.0, Utc::now());
        let d = evaluate(&cfg(), &mut st, 8, &set(&[1, 2]), 9.0, Utc::now());
        assert!(d.cold_start);
        assert_eq!(st.account_login, Some(8));
        assert_eq!(st.baseline_tickets, set(&[1, 2]));
    }

    #[test]
    fn attempts_grow_by_new_tickets_not_by_ticks() {
        let mut st = AggregateState::default();
        evaluate(&cfg(), &mut st, 7, &set(&[1]), 1.0, Utc::now());
        let d = evaluate(&cfg(), &mut st, 7, &set(&[1, 2, 3]), 7.0, Utc::now());
        assert_eq!(d.attempts, 2);
        assert!(!d.blocked);
        // baseline unchanged above threshold
        assert_eq!(st.baseline_tickets, set(&[1]));
    }

    #[test]
    fn exactly_at_threshold_counts_as_within() {
        let mut st = AggregateState::default();
        evaluate(&cfg(), &mut st, 7, &set(&[1]), 1.0, Utc::now());
        let d = evaluate(&cfg(), &mut st, 7, &set(&[1, 2]), 5.0, Utc::now());
        assert!(d.within_limit);
        assert!(d.new_violations.is_empty());
        assert_eq!(st.baseline_tickets, set(&[1, 2]));
    }

    #[test]
    fn returning_within_limit_clears_block() {
        let mut st = AggregateState {
            initialized: true,
            account_login: Some(7),
            baseline_tickets: set(&[1]),
            attempts: 4,
            blocked: true,
            updated_at: None,
        };
        let d = evaluate(&cfg(), &mut st, 7, &set(&[1]), 2.0, Utc::now());
        assert!(d.blocked_before);
        assert!(!d.blocked);
        assert_eq!(st.attempts, 0);
    }
}
