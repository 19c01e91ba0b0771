//! Execution lock: a persisted "trading disabled until" horizon backed by the
//! venue's automation switch.

use crate::context::EngineContext;
use crate::drawdown;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rg_state::{docs, StateStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

pub const MODULE: &str = "execution_lock";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLockState {
    #[serde(default)]
    pub disabled_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockStatus {
    pub active: bool,
    pub until: Option<DateTime<Utc>>,
    pub remaining_secs: i64,
}

impl LockStatus {
    fn from_state(st: &ExecutionLockState, now: DateTime<Utc>) -> Self {
        let remaining_secs = st
            .disabled_until
            .map(|u| (u - now).num_seconds().max(0))
            .unwrap_or(0);
        Self {
            active: remaining_secs > 0,
            until: st.disabled_until,
            remaining_secs,
        }
    }
}

pub fn status(store: &StateStore, now: DateTime<Utc>) -> LockStatus {
    let st: ExecutionLockState = store.load(docs::EXECUTION_LOCK);
    LockStatus::from_state(&st, now)
}

/// Persist the horizon, then turn the venue's automation switch off.
pub fn engage(ctx: &EngineContext<'_>, until: DateTime<Utc>, reason: &str) -> Result<LockStatus> {
    let now = ctx.now();
    let st = ctx.store.update(docs::EXECUTION_LOCK, |st: &mut ExecutionLockState| {
        st.disabled_until = Some(until);
        st.reason = Some(reason.to_string());
        st.clone()
    })?;
    let switched_off = ctx.toggle.disable();
    if !switched_off {
        warn!(%until, "automation disable not confirmed while engaging execution lock");
    }
    info!(%until, reason, "execution lock engaged");
    ctx.log(
        "KILL_SWITCH",
        MODULE,
        None,
        json!({ "action": "engage", "until": until, "reason": reason, "toggle_ok": switched_off }),
    );
    Ok(LockStatus::from_state(&st, now))
}

/// Turn automation back on and clear the horizon. The document is kept when
/// the switch does not confirm, so the next tick tries again.
pub fn release(ctx: &EngineContext<'_>) -> Result<bool> {
    let switched_on = ctx.toggle.enable();
    if !switched_on {
        warn!("automation enable not confirmed; execution lock kept");
        ctx.log("KILL_SWITCH", MODULE, None, json!({ "action": "release", "toggle_ok": false }));
        return Ok(false);
    }
    ctx.store
        .store(docs::EXECUTION_LOCK, &ExecutionLockState::default())?;
    info!("execution lock released");
    ctx.log("KILL_SWITCH", MODULE, None, json!({ "action": "release", "toggle_ok": true }));
    Ok(true)
}

/// Release an expired lock, unless the drawdown module still waits for an unlock.
pub fn maybe_release(ctx: &EngineContext<'_>) -> Result<bool> {
    let now = ctx.now();
    let st = status(ctx.store, now);
    if st.active || st.until.is_none() {
        return Ok(false);
    }
    if drawdown::status(ctx.store, now).awaiting_unlock {
        return Ok(false);
    }
    release(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_reports_remaining_seconds() {
        let now = Utc::now();
        let st = ExecutionLockState {
            disabled_until: Some(now + Duration::seconds(90)),
            reason: None,
        };
        let s = LockStatus::from_state(&st, now);
        assert!(s.active);
        assert_eq!(s.remaining_secs, 90);
    }

    #[test]
    fn expired_lock_is_inactive_but_keeps_until() {
        let now = Utc::now();
        let st = ExecutionLockState {
            disabled_until: Some(now - Duration::seconds(5)),
            reason: None,
        };
        let s = LockStatus::from_state(&st, now);
        assert!(!s.active);
        assert_eq!(s.remaining_secs, 0);
        assert!(s.until.is_some());
    }

    #[test]
    fn empty_state_is_inactive() {
        let s = LockStatus::from_state(&ExecutionLockState::default(), Utc::now());
        assert!(!s.active);
        assert!(s.until.is_none());
    }
}
