//! Operator commands that only touch persisted state or the notifier inbox.

use anyhow::{Context, Result};
use chrono::Utc;
use rg_config::{resolve_unlock_secret, RiskGuardConfig};
use rg_risk::{aggregate, breach, drawdown, execution_lock, per_trade};
use rg_state::StateStore;
use serde_json::json;

pub fn status(cfg: &RiskGuardConfig) -> Result<()> {
    let store = StateStore::open(&cfg.state.dir)?;
    let now = Utc::now();

    let agg = aggregate::status(&store);
    let pt = per_trade::status(&store);
    let pending: Vec<_> = pt
        .tickets
        .values()
        .filter(|d| d.status == rg_risk::DecisionStatus::Pending)
        .map(|d| d.ticket)
        .collect();

    let out = json!({
        "at": now,
        "block": breach::block_state(&store, now),
        "execution_lock": execution_lock::status(&store, now),
        "drawdown": drawdown::status(&store, now),
        "aggregate": {
            "account_login": agg.account_login,
            "baseline_tickets": agg.baseline_tickets,
            "attempts": agg.attempts,
            "blocked": agg.blocked,
        },
        "per_trade": {
            "tracked": pt.tickets.len(),
            "pending": pending,
            "decisions": pt.tickets,
        },
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

pub fn set_secret(cfg: &RiskGuardConfig, secret: Option<&str>) -> Result<()> {
    let from_env = match secret {
        Some(_) => None,
        None => resolve_unlock_secret(cfg)?,
    };
    let value = match (secret, from_env.as_ref()) {
        (Some(s), _) => s.to_string(),
        (None, Some(r)) => r.value.clone(),
        (None, None) => anyhow::bail!(
            "SECRET_NOT_CONFIGURED: pass a secret or set env var {}",
            cfg.secrets.unlock_env
        ),
    };

    let store = StateStore::open(&cfg.state.dir)?;
    drawdown::set_secret(&store, &value)?;
    println!("secret_configured=true");
    Ok(())
}

pub fn reply(cfg: &RiskGuardConfig, text: &str) -> Result<()> {
    let notifier = rg_runtime::file_notifier(cfg)?;
    notifier
        .reply(text, Utc::now())
        .context("append operator reply")?;
    println!("reply_queued=true inbox={}", notifier.inbox_path().display());
    Ok(())
}
