//! Breach detector: positions seen while any block is active are reported
//! once per ticket. Nothing is closed here.

use crate::context::EngineContext;
use crate::{aggregate, drawdown, execution_lock};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rg_schemas::{AccountSnapshot, Ticket};
use rg_state::{docs, StateStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::warn;

pub const MODULE: &str = "guard";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    pub kill_active: bool,
    pub dd_cooldown: bool,
    pub dd_awaiting: bool,
    pub risk_block: bool,
}

impl BlockState {
    pub fn any(&self) -> bool {
        self.kill_active || self.dd_cooldown || self.dd_awaiting || self.risk_block
    }
}

/// Consolidated block view across the execution lock, drawdown and aggregate state.
pub fn block_state(store: &StateStore, now: DateTime<Utc>) -> BlockState {
    let dd = drawdown::status(store, now);
    BlockState {
        kill_active: execution_lock::status(store, now).active,
        dd_cooldown: dd.cooldown_until.is_some(),
        dd_awaiting: dd.awaiting_unlock,
        risk_block: aggregate::status(store).blocked,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreachCache {
    pub tickets_reported: BTreeSet<Ticket>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreachReport {
    pub block: BlockState,
    pub reported: Vec<Ticket>,
}

pub fn detect_and_report(ctx: &EngineContext<'_>, snap: &AccountSnapshot) -> Result<BreachReport> {
    let block = block_state(ctx.store, ctx.now());
    if !block.any() || snap.positions.is_empty() {
        return Ok(BreachReport {
            block,
            reported: Vec::new(),
        });
    }

    let tickets = snap.tickets();
    let reported = ctx.store.update(docs::BREACH_CACHE, |cache: &mut BreachCache| {
        let fresh: Vec<Ticket> = tickets
            .difference(&cache.tickets_reported)
            .copied()
            .collect();
        cache.tickets_reported.extend(fresh.iter().copied());
        fresh
    })?;

    if !reported.is_empty() {
        warn!(tickets = ?reported, ?block, "positions opened while blocked");
        ctx.log(
            "BLOCK_BREACH",
            MODULE,
            Some(&snap.account),
            json!({ "tickets": reported, "block_state": block }),
        );
        let mut lines = vec!["Trading attempt detected while blocked:".to_string()];
        lines.extend(
            snap.positions
                .iter()
                .filter(|p| reported.contains(&p.ticket))
                .map(|p| format!("• {} #{} vol={} side={}", p.symbol, p.ticket, p.volume, p.side)),
        );
        ctx.notify("BLOCK_BREACH", lines);
    }

    Ok(BreachReport { block, reported })
}
