//! Position Closer: the single route by which the engine closes a position or
//! changes its protective levels.
//!
//! Escalation for a close:
//! 1. `direct_attempts` IOC sends at moderate slippage, `attempt_gap_ms` apart.
//! 2. One FOK send at maximum slippage.
//! 3. Only when a failure says the venue's automated-execution switch is off:
//!    enable the switch, settle, run 1-2 once more, wait, disable the switch.
//!
//! A fresh quote is fetched before every send. The closer never retries past
//! this protocol; callers re-attempt on a later tick if they want to.

use crate::pause::PauseGuard;
use crate::types::{safe_comment, FillMode, ModifyRequest, OrderRequest, OrderResult, VenueError};
use crate::venue::{AutomationToggle, OrderExecution};
use rg_schemas::{Position, Side, Ticket};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloserConfig {
    pub direct_attempts: u32,
    pub direct_deviation: u32,
    pub attempt_gap_ms: u64,
    pub forced_deviation: u32,
    /// Wait after enabling the switch before resending.
    pub toggle_settle_ms: u64,
    /// Wait after the escalated send before disabling the switch.
    pub post_retry_ms: u64,
    pub toggle_off_settle_ms: u64,
}

impl Default for CloserConfig {
    fn default() -> Self {
        Self {
            direct_attempts: 3,
            direct_deviation: 50,
            attempt_gap_ms: 150,
            forced_deviation: 9999,
            toggle_settle_ms: 500,
            post_retry_ms: 500,
            toggle_off_settle_ms: 400,
        }
    }
}

impl CloserConfig {
    /// Same protocol, no sleeping. For tests and dry runs.
    pub fn without_delays() -> Self {
        Self {
            attempt_gap_ms: 0,
            toggle_settle_ms: 0,
            post_retry_ms: 0,
            toggle_off_settle_ms: 0,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ExecStep {
    Attempt {
        n: u32,
        fill: FillMode,
        deviation: u32,
        retcode: Option<u32>,
    },
    Forced {
        deviation: u32,
        retcode: Option<u32>,
    },
    Modify {
        retcode: Option<u32>,
    },
    ToggleOn {
        ok: bool,
    },
    ToggleOff {
        ok: bool,
    },
}

impl ExecStep {
    fn is_send(&self) -> bool {
        matches!(
            self,
            ExecStep::Attempt { .. } | ExecStep::Forced { .. } | ExecStep::Modify { .. }
        )
    }
}

/// Ordered record of everything one close / modify invocation did.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecTrail {
    steps: Vec<ExecStep>,
}

impl ExecTrail {
    fn push(&mut self, step: ExecStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[ExecStep] {
        &self.steps
    }

    pub fn send_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_send()).count()
    }

    /// Sends before the first toggle step.
    pub fn direct_send_count(&self) -> usize {
        self.steps
            .iter()
            .take_while(|s| s.is_send())
            .count()
    }

    /// Every `ToggleOff` is preceded by a `ToggleOn` not yet matched.
    pub fn toggle_balanced(&self) -> bool {
        let mut open = 0i32;
        for s in &self.steps {
            match s {
                ExecStep::ToggleOn { .. } => open += 1,
                ExecStep::ToggleOff { .. } => {
                    if open == 0 {
                        return false;
                    }
                    open -= 1;
                }
                _ => {}
            }
        }
        open == 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecPath {
    Direct,
    Toggled,
}

impl fmt::Display for ExecPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecPath::Direct => write!(f, "direct"),
            ExecPath::Toggled => write!(f, "toggled"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub ok: bool,
    pub path: ExecPath,
    pub trail: ExecTrail,
    /// Human-readable reason for the final state.
    pub detail: String,
    /// Last venue result seen, if any send produced one.
    pub result: Option<OrderResult>,
}

// ---------------------------------------------------------------------------
// Closer
// ---------------------------------------------------------------------------

struct Round {
    ok: bool,
    disabled: bool,
    last: Option<OrderResult>,
    detail: String,
}

impl Round {
    fn new() -> Self {
        Self {
            ok: false,
            disabled: false,
            last: None,
            detail: String::new(),
        }
    }

    fn absorb(&mut self, sent: &Result<OrderResult, VenueError>) -> Option<u32> {
        match sent {
            Ok(res) => {
                self.disabled |= res.automation_disabled();
                self.ok = res.is_done();
                self.detail = format!("retcode {} {}", res.retcode, res.comment)
                    .trim_end()
                    .to_string();
                self.last = Some(res.clone());
                Some(res.retcode)
            }
            Err(e) => {
                self.disabled |= e.automation_disabled();
                self.ok = false;
                self.detail = e.to_string();
                None
            }
        }
    }
}

pub struct PositionCloser<'a> {
    venue: &'a dyn OrderExecution,
    toggle: &'a dyn AutomationToggle,
    cfg: CloserConfig,
    pause_marker: Option<PathBuf>,
}

impl<'a> PositionCloser<'a> {
    pub fn new(
        venue: &'a dyn OrderExecution,
        toggle: &'a dyn AutomationToggle,
        cfg: CloserConfig,
    ) -> Self {
        Self {
            venue,
            toggle,
            cfg,
            pause_marker: None,
        }
    }

    /// Keep `path` present for the duration of every close / modify.
    pub fn with_pause_marker(mut self, path: impl Into<PathBuf>) -> Self {
        self.pause_marker = Some(path.into());
        self
    }

    pub fn config(&self) -> &CloserConfig {
        &self.cfg
    }

    pub fn venue(&self) -> &'a dyn OrderExecution {
        self.venue
    }

    pub fn close_position(&self, pos: &Position, comment: &str) -> ExecOutcome {
        self.close(pos.ticket, &pos.symbol, pos.side, pos.volume, comment)
    }

    /// Close `volume` of position `ticket`. `side` is the position's side.
    pub fn close(
        &self,
        ticket: Ticket,
        symbol: &str,
        side: Side,
        volume: f64,
        comment: &str,
    ) -> ExecOutcome {
        let _pause = self.pause_marker.as_ref().and_then(|p| PauseGuard::engage(p));
        let comment = safe_comment(comment);
        let mut trail = ExecTrail::default();

        let send = |fill: FillMode, deviation: u32| -> Result<OrderResult, VenueError> {
            let close_side = side.opposite();
            let quote = self.venue.quote(symbol)?;
            let req = OrderRequest {
                ticket,
                symbol: symbol.to_string(),
                side: close_side,
                volume,
                price: quote.price_for(close_side),
                deviation,
                fill,
                comment: comment.clone(),
            };
            self.venue.send_order(&req)
        };

        let first = self.close_round(&send, &mut trail);
        let outcome = if first.ok || !first.disabled {
            finish(ExecPath::Direct, first, trail)
        } else {
            warn!(ticket, symbol, detail = %first.detail, "close refused: automation disabled; escalating");
            let second = self.escalate(&mut trail, |trail| self.close_round(&send, trail));
            finish(ExecPath::Toggled, second, trail)
        };

        if outcome.ok {
            info!(ticket, symbol, path = %outcome.path, sends = outcome.trail.send_count(), "position closed");
        } else {
            warn!(ticket, symbol, path = %outcome.path, detail = %outcome.detail, "position close failed");
        }
        outcome
    }

    /// Change stop-loss / take-profit. `None` clears the level.
    pub fn modify_sltp(
        &self,
        ticket: Ticket,
        symbol: &str,
        sl: Option<f64>,
        tp: Option<f64>,
        comment: &str,
    ) -> ExecOutcome {
        let _pause = self.pause_marker.as_ref().and_then(|p| PauseGuard::engage(p));
        let digits = self
            .venue
            .symbol_info(symbol)
            .map(|i| i.digits)
            .unwrap_or(5);
        let req = ModifyRequest {
            ticket,
            symbol: symbol.to_string(),
            sl: wire_level(sl, digits),
            tp: wire_level(tp, digits),
            comment: safe_comment(comment),
        };
        let mut trail = ExecTrail::default();

        let modify_round = |trail: &mut ExecTrail| {
            let mut round = Round::new();
            let sent = self.venue.modify_position(&req);
            let retcode = round.absorb(&sent);
            trail.push(ExecStep::Modify { retcode });
            round
        };

        let first = modify_round(&mut trail);
        let outcome = if first.ok || !first.disabled {
            finish(ExecPath::Direct, first, trail)
        } else {
            warn!(ticket, symbol, "modify refused: automation disabled; escalating");
            let second = self.escalate(&mut trail, modify_round);
            finish(ExecPath::Toggled, second, trail)
        };

        if outcome.ok {
            info!(ticket, symbol, sl = req.sl, tp = req.tp, path = %outcome.path, "protective levels modified");
        } else {
            warn!(ticket, symbol, detail = %outcome.detail, "modify failed");
        }
        outcome
    }

    fn close_round<F>(&self, send: &F, trail: &mut ExecTrail) -> Round
    where
        F: Fn(FillMode, u32) -> Result<OrderResult, VenueError>,
    {
        let mut round = Round::new();

        for n in 1..=self.cfg.direct_attempts {
            let sent = send(FillMode::Ioc, self.cfg.direct_deviation);
            let retcode = round.absorb(&sent);
            trail.push(ExecStep::Attempt {
                n,
                fill: FillMode::Ioc,
                deviation: self.cfg.direct_deviation,
                retcode,
            });
            if round.ok {
                return round;
            }
            sleep_ms(self.cfg.attempt_gap_ms);
        }

        let sent = send(FillMode::Fok, self.cfg.forced_deviation);
        let retcode = round.absorb(&sent);
        trail.push(ExecStep::Forced {
            deviation: self.cfg.forced_deviation,
            retcode,
        });
        round
    }

    /// enable → settle → retry → wait → disable → settle. The disable always
    /// follows the enable, whatever the retry did.
    fn escalate<F>(&self, trail: &mut ExecTrail, retry: F) -> Round
    where
        F: FnOnce(&mut ExecTrail) -> Round,
    {
        let on = self.toggle.enable();
        trail.push(ExecStep::ToggleOn { ok: on });
        if !on {
            warn!("automation enable not confirmed; retrying anyway");
        }
        sleep_ms(self.cfg.toggle_settle_ms);

        let round = retry(trail);
        sleep_ms(self.cfg.post_retry_ms);

        let off = self.toggle.disable();
        trail.push(ExecStep::ToggleOff { ok: off });
        if !off {
            warn!("automation disable not confirmed");
        }
        sleep_ms(self.cfg.toggle_off_settle_ms);
        round
    }
}

fn finish(path: ExecPath, round: Round, trail: ExecTrail) -> ExecOutcome {
    let detail = if round.ok {
        "done".to_string()
    } else if round.detail.is_empty() {
        "no send attempted".to_string()
    } else {
        round.detail
    };
    ExecOutcome {
        ok: round.ok,
        path,
        trail,
        detail,
        result: round.last,
    }
}

fn wire_level(level: Option<f64>, digits: u32) -> f64 {
    match level {
        Some(v) if v != 0.0 => {
            let factor = 10f64.powi(digits as i32);
            (v * factor).round() / factor
        }
        _ => 0.0,
    }
}

fn sleep_ms(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

// ---------------------------------------------------------------------------
// Internal unit tests
// ---------------------------------------------------------------------------
