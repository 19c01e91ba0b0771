//! Drawdown kill switch.
//!
//! `NORMAL -> TRIPPED (cooldown) -> AWAITING_UNLOCK -> NORMAL`. A trip closes
//! every open position and engages the execution lock for the cooldown. After
//! the cooldown the lock is re-armed on a rolling 24h horizon until a
//! correct-secret unlock.

use crate::context::{close_all, CloseRecord, EngineContext};
use crate::execution_lock;
use crate::secret::{hash_secret, verify_secret, SecretError};
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use rg_schemas::{AccountInfo, AccountSnapshot, PCT_EPSILON};
use rg_state::{docs, StateStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

pub const MODULE: &str = "drawdown";
pub const CLOSE_COMMENT: &str = "RG DD kill";

/// Horizon of each re-arm while awaiting unlock.
pub const REARM_HOURS: i64 = 24;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawdownConfig {
    pub enabled: bool,
    pub limit_pct: f64,
    pub cooldown_days: i64,
}

impl Default for DrawdownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit_pct: 20.0,
            cooldown_days: 30,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawdownState {
    pub tracking_initialized: bool,
    pub account_login: Option<u64>,
    pub account_server: Option<String>,
    pub tracking_started_at: Option<DateTime<Utc>>,
    pub baseline_equity: Option<f64>,
    pub peak_equity: Option<f64>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub awaiting_unlock: bool,
    /// `salt$hex`. Survives account re-initialisation.
    pub secret_hash: Option<String>,
    pub last_trip_at: Option<DateTime<Utc>>,
    pub dd_limit_pct: Option<f64>,
}

impl DrawdownState {
    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        matches!(self.cooldown_until, Some(u) if now < u)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawdownDecision {
    pub reinitialized: bool,
    pub equity: f64,
    pub peak_equity: f64,
    pub dd_pct: f64,
    pub tripped: bool,
    /// Set when this evaluation tripped: the cooldown horizon.
    pub trip_until: Option<DateTime<Utc>>,
    pub in_cooldown: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub awaiting_unlock: bool,
    /// Cooldown over but still locked out: the execution lock must stay armed.
    pub needs_rearm: bool,
}

// ---------------------------------------------------------------------------
// Pure transition
// ---------------------------------------------------------------------------

pub fn evaluate(
    cfg: &DrawdownConfig,
    st: &mut DrawdownState,
    account: &AccountInfo,
    now: DateTime<Utc>,
) -> DrawdownDecision {
    let equity = account.equity;
    let reinitialized = !st.tracking_initialized || st.account_login != Some(account.login);
    if reinitialized {
        *st = DrawdownState {
            tracking_initialized: true,
            account_login: Some(account.login),
            account_server: Some(account.server.clone()),
            tracking_started_at: Some(now),
            baseline_equity: Some(equity),
            peak_equity: Some(equity),
            cooldown_until: None,
            awaiting_unlock: false,
            secret_hash: st.secret_hash.take(),
            last_trip_at: None,
            dd_limit_pct: Some(cfg.limit_pct),
        };
    }

    let in_cooldown = st.in_cooldown(now);
    if !in_cooldown {
        st.cooldown_until = None;
    }

    let mut peak = match st.peak_equity {
        Some(p) if p > 0.0 => p,
        _ => equity,
    };
    if !in_cooldown && equity > peak {
        peak = equity;
    }
    st.peak_equity = Some(peak);
    st.dd_limit_pct = Some(cfg.limit_pct);

    let dd_pct = if peak > 0.0 {
        ((peak - equity) / peak * 100.0).max(0.0)
    } else {
        0.0
    };
    let tripped = dd_pct >= cfg.limit_pct - PCT_EPSILON;

    let mut trip_until = None;
    if tripped && !in_cooldown && !st.awaiting_unlock {
        let until = now + Duration::days(cfg.cooldown_days);
        st.cooldown_until = Some(until);
        st.awaiting_unlock = true;
        st.last_trip_at = Some(now);
        trip_until = Some(until);
    }

    DrawdownDecision {
        reinitialized,
        equity,
        peak_equity: peak,
        dd_pct,
        tripped,
        trip_until,
        in_cooldown,
        cooldown_until: st.cooldown_until,
        awaiting_unlock: st.awaiting_unlock,
        needs_rearm: trip_until.is_none() && st.awaiting_unlock && !in_cooldown,
    }
}

// ---------------------------------------------------------------------------
// Enforcement
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawdownReport {
    pub equity: f64,
    pub peak_equity: f64,
    pub dd_pct: f64,
    pub dd_limit_pct: f64,
    pub tripped: bool,
    pub tripped_now: bool,
    pub in_cooldown: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub awaiting_unlock: bool,
    pub tracking_initialized: bool,
    pub rearmed_until: Option<DateTime<Utc>>,
    pub closed: Vec<CloseRecord>,
    pub failed: Vec<CloseRecord>,
}

impl DrawdownReport {
    pub fn notable(&self) -> bool {
        self.tripped
            || !self.closed.is_empty()
            || !self.failed.is_empty()
            || self.awaiting_unlock
            || self.in_cooldown
    }
}

pub fn enforce(
    ctx: &EngineContext<'_>,
    snap: &AccountSnapshot,
    cfg: &DrawdownConfig,
) -> Result<DrawdownReport> {
    let now = ctx.now();
    let d = ctx.store.update(docs::DRAWDOWN, |st: &mut DrawdownState| {
        evaluate(cfg, st, &snap.account, now)
    })?;

    if d.reinitialized {
        info!(
            login = snap.account.login,
            equity = d.equity,
            "drawdown tracking started"
        );
    }

    let mut closed = Vec::new();
    let mut failed = Vec::new();
    let mut rearmed_until = None;

    if let Some(until) = d.trip_until {
        warn!(
            dd_pct = d.dd_pct,
            limit = cfg.limit_pct,
            peak = d.peak_equity,
            equity = d.equity,
            "drawdown limit reached; closing all positions"
        );
        (closed, failed) = close_all(ctx, &snap.positions, CLOSE_COMMENT);
        execution_lock::engage(ctx, until, "drawdown")?;
        ctx.log(
            "DD_TRIP",
            MODULE,
            Some(&snap.account),
            json!({
                "dd_pct": d.dd_pct,
                "dd_limit_pct": cfg.limit_pct,
                "peak_equity": d.peak_equity,
                "equity": d.equity,
                "cooldown_until": until,
                "closed": closed.len(),
                "failed": failed.len(),
            }),
        );
        ctx.notify(
            "DD_KILL",
            vec![
                format!(
                    "Drawdown {:.2}% reached the {:.2}% limit",
                    d.dd_pct, cfg.limit_pct
                ),
                format!("Peak {:.2} / equity {:.2}", d.peak_equity, d.equity),
                format!("Closed {} / failed {}", closed.len(), failed.len()),
                format!("Trading disabled until {}", until.format("%Y-%m-%d %H:%M UTC")),
                "Unlock with the local secret once the cooldown ends".to_string(),
            ],
        );
    } else if d.needs_rearm && !execution_lock::status(ctx.store, now).active {
        let until = now + Duration::hours(REARM_HOURS);
        execution_lock::engage(ctx, until, "drawdown awaiting unlock")?;
        rearmed_until = Some(until);
    }

    Ok(DrawdownReport {
        equity: d.equity,
        peak_equity: d.peak_equity,
        dd_pct: d.dd_pct,
        dd_limit_pct: cfg.limit_pct,
        tripped: d.tripped,
        tripped_now: d.trip_until.is_some(),
        in_cooldown: d.in_cooldown,
        cooldown_until: d.cooldown_until,
        awaiting_unlock: d.awaiting_unlock,
        tracking_initialized: d.reinitialized,
        rearmed_until,
        closed,
        failed,
    })
}

// ---------------------------------------------------------------------------
// Operator surface
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawdownStatus {
    pub peak_equity: Option<f64>,
    pub tracking_started_at: Option<DateTime<Utc>>,
    pub dd_limit_pct: Option<f64>,
    /// Only a cooldown still running at `now`.
    pub cooldown_until: Option<DateTime<Utc>>,
    pub awaiting_unlock: bool,
    pub secret_configured: bool,
}

pub fn status(store: &StateStore, now: DateTime<Utc>) -> DrawdownStatus {
    let st: DrawdownState = store.load(docs::DRAWDOWN);
    DrawdownStatus {
        peak_equity: st.peak_equity,
        tracking_started_at: st.tracking_started_at,
        dd_limit_pct: st.dd_limit_pct,
        cooldown_until: st.cooldown_until.filter(|u| now < *u),
        awaiting_unlock: st.awaiting_unlock,
        secret_configured: st.secret_hash.is_some(),
    }
}

/// Store a new unlock secret. A too-short secret fails with `SecretError::TooShort`.
pub fn set_secret(store: &StateStore, secret: &str) -> Result<()> {
    let hashed = hash_secret(secret)?;
    store.update(docs::DRAWDOWN, |st: &mut DrawdownState| {
        st.secret_hash = Some(hashed);
    })?;
    info!("unlock secret configured");
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnlockReport {
    pub ok: bool,
    pub reason: String,
    pub lock_released: bool,
}

/// Clear `awaiting_unlock` given the right secret. A wrong secret writes nothing.
pub fn unlock(ctx: &EngineContext<'_>, secret: &str) -> Result<UnlockReport> {
    let now = ctx.now();
    let current: DrawdownState = ctx.store.load(docs::DRAWDOWN);
    let verified = current
        .secret_hash
        .as_deref()
        .map(|h| verify_secret(h, secret))
        .unwrap_or(false);

    if !verified {
        let reason = if current.secret_hash.is_none() {
            SecretError::NotConfigured.to_string()
        } else {
            "invalid secret".to_string()
        };
        warn!(%reason, "unlock refused");
        ctx.log("DD_UNLOCK", MODULE, None, json!({ "ok": false, "reason": reason }));
        ctx.notify("DD_UNLOCK", vec![format!("Unlock refused: {reason}")]);
        return Ok(UnlockReport {
            ok: false,
            reason,
            lock_released: false,
        });
    }

    let still_cooling = ctx.store.update(docs::DRAWDOWN, |st: &mut DrawdownState| {
        st.awaiting_unlock = false;
        if !st.in_cooldown(now) {
            st.cooldown_until = None;
        }
        st.in_cooldown(now)
    })?;

    let lock_released = if still_cooling {
        false
    } else {
        execution_lock::release(ctx)?
    };

    info!(lock_released, still_cooling, "drawdown unlocked");
    ctx.log(
        "DD_UNLOCK",
        MODULE,
        None,
        json!({ "ok": true, "lock_released": lock_released, "cooldown_active": still_cooling }),
    );
    let mut lines = vec!["Drawdown lock cleared by local secret".to_string()];
    if still_cooling {
        lines.push("Cooldown still running; trading resumes when it ends".to_string());
    }
    ctx.notify("DD_UNLOCK", lines);

    Ok(UnlockReport {
        ok: true,
        reason: "unlocked".to_string(),
        lock_released,
    })
}

/// Set the peak so that `equity` sits exactly `target_dd_pct` below it.
pub fn simulate(store: &StateStore, target_dd_pct: f64, equity: f64) -> Result<f64> {
    if !(target_dd_pct > 0.0) || !(target_dd_pct < 100.0) || !(equity > 0.0) {
        bail!("SIMULATE_DD_INVALID: need 0 < dd < 100 and equity > 0 (dd={target_dd_pct}, equity={equity})");
    }
    let peak = equity / (1.0 - target_dd_pct / 100.0);
    store.try_update(docs::DRAWDOWN, |st: &mut DrawdownState| {
        if !st.tracking_initialized {
            bail!("SIMULATE_DD_INVALID: drawdown tracking has not started for any account");
        }
        st.peak_equity = Some(peak);
        Ok(())
    })?;
    info!(target_dd_pct, equity, peak, "simulated drawdown peak set");
    Ok(peak)
}
