use crate::clock::Clock;
use chrono::{DateTime, Utc};
use rg_audit::EventLogger;
use rg_execution::{AutomationToggle, ExecOutcome, ExecPath, PositionCloser};
use rg_notify::Notifier;
use rg_schemas::{AccountInfo, Position, Ticket};
use rg_state::StateStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// Everything a rule module may touch. Built once per tick by the caller;
/// modules hold no state of their own between calls.
#[derive(Clone, Copy)]
pub struct EngineContext<'a> {
    pub store: &'a StateStore,
    pub closer: &'a PositionCloser<'a>,
    pub toggle: &'a dyn AutomationToggle,
    pub notifier: &'a dyn Notifier,
    pub logger: &'a dyn EventLogger,
    pub clock: &'a dyn Clock,
}

impl<'a> EngineContext<'a> {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Structured event tagged with the emitting module and, when known, the account.
    pub fn log(&self, event_type: &str, module: &str, account: Option<&AccountInfo>, payload: Value) {
        let context = match account {
            Some(a) => json!({ "module": module, "login": a.login, "server": a.server }),
            None => json!({ "module": module }),
        };
        self.logger.log_event(event_type, payload, context);
    }

    /// Best-effort push. A refused alert is logged and otherwise ignored.
    pub fn notify(&self, kind: &str, lines: Vec<String>) -> bool {
        let ok = self.notifier.notify(kind, &lines);
        if !ok {
            warn!(kind, "notifier did not accept alert");
        }
        ok
    }
}

/// Outcome of one close issued by a rule module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloseRecord {
    pub ticket: Ticket,
    pub symbol: String,
    pub ok: bool,
    pub path: ExecPath,
    pub detail: String,
}

impl CloseRecord {
    pub fn new(pos: &Position, out: &ExecOutcome) -> Self {
        Self {
            ticket: pos.ticket,
            symbol: pos.symbol.clone(),
            ok: out.ok,
            path: out.path,
            detail: out.detail.clone(),
        }
    }
}

/// Close every position in `targets`, splitting outcomes into (closed, failed).
/// One failure never stops the rest.
pub(crate) fn close_all<'p>(
    ctx: &EngineContext<'_>,
    targets: impl IntoIterator<Item = &'p Position>,
    comment: &str,
) -> (Vec<CloseRecord>, Vec<CloseRecord>) {
    let mut closed = Vec::new();
    let mut failed = Vec::new();
    for pos in targets {
        let out = ctx.closer.close_position(pos, comment);
        let rec = CloseRecord::new(pos, &out);
        if rec.ok {
            closed.push(rec);
        } else {
            failed.push(rec);
        }
    }
    (closed, failed)
}
