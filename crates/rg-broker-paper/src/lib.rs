//! Deterministic in-memory "paper" venue.
//!
//! Implements every venue capability the engine consumes (`AccountSource`,
//! `OrderExecution`, `AutomationToggle`) over a `PaperBook`, which can be
//! loaded from and saved to a JSON file.
//!
//! Design decisions:
//! - Sends are refused with 10027 while the automated-execution switch is off,
//!   so the closer's toggle path is exercised by the same model as a terminal.
//! - Closing a ticket that no longer exists is a no-op reported as 10036.
//! - Scripted results and snapshot failures can be queued for tests; every
//!   call is appended to a journal in order.

mod book;

pub use book::{fx_symbol, PaperBook, PaperPosition};

use anyhow::{Context, Result};
use chrono::Utc;
use rg_execution::{
    AccountSource, AutomationToggle, FillMode, ModifyRequest, OrderExecution, OrderRequest,
    OrderResult, VenueError,
};
use rg_schemas::{
    risk_money_per_lot, AccountSnapshot, Position, Quote, Side, SymbolInfo, Ticket,
};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

pub const RETCODE_AUTOMATION_DISABLED: u32 = 10027;
pub const RETCODE_POSITION_CLOSED: u32 = 10036;

/// One call into the venue, in the order it happened.
#[derive(Clone, Debug, PartialEq)]
pub enum VenueCall {
    Snapshot,
    Quote {
        symbol: String,
    },
    Send {
        ticket: Ticket,
        side: Side,
        fill: FillMode,
        deviation: u32,
        price: f64,
    },
    Modify {
        ticket: Ticket,
        sl: f64,
        tp: f64,
    },
    Enable,
    Disable,
}

#[derive(Debug, Default)]
pub struct PaperVenue {
    book: RefCell<PaperBook>,
    journal: RefCell<Vec<VenueCall>>,
    scripted_sends: RefCell<VecDeque<Result<OrderResult, VenueError>>>,
    scripted_modifies: RefCell<VecDeque<Result<OrderResult, VenueError>>>,
    snapshot_failures: Cell<u32>,
}

impl Default for PaperBook {
    fn default() -> Self {
        PaperBook::new(0, 0.0)
    }
}

impl PaperVenue {
    pub fn new(book: PaperBook) -> Self {
        Self {
            book: RefCell::new(book),
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).with_context(|| format!("read venue {:?}", path))?;
        let book: PaperBook =
            serde_json::from_str(&raw).with_context(|| format!("parse venue {:?}", path))?;
        Ok(Self::new(book))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let body = serde_json::to_string_pretty(&*self.book.borrow())
            .context("serialize venue book")?;
        fs::write(path, body).with_context(|| format!("write venue {:?}", path))
    }

    pub fn book(&self) -> PaperBook {
        self.book.borrow().clone()
    }

    // ---------------------------------------------------------------------
    // Scenario setup
    // ---------------------------------------------------------------------

    pub fn add_symbol(&self, info: SymbolInfo, bid: f64, ask: f64) {
        let mut b = self.book.borrow_mut();
        b.quotes.insert(info.symbol.clone(), Quote { bid, ask });
        b.symbols.insert(info.symbol.clone(), info);
    }

    pub fn set_quote(&self, symbol: &str, bid: f64, ask: f64) {
        self.book
            .borrow_mut()
            .quotes
            .insert(symbol.to_string(), Quote { bid, ask });
    }

    pub fn remove_quote(&self, symbol: &str) {
        self.book.borrow_mut().quotes.remove(symbol);
    }

    pub fn remove_symbol_info(&self, symbol: &str) {
        self.book.borrow_mut().symbols.remove(symbol);
    }

    pub fn set_equity(&self, equity: f64) {
        self.book.borrow_mut().account.equity = equity;
    }

    pub fn set_login(&self, login: u64) {
        self.book.borrow_mut().account.login = login;
    }

    pub fn set_automation(&self, enabled: bool) {
        self.book.borrow_mut().automation_enabled = enabled;
    }

    pub fn automation_enabled(&self) -> bool {
        self.book.borrow().automation_enabled
    }

    /// Open a position as if placed by a human or another process.
    pub fn open(
        &self,
        symbol: &str,
        side: Side,
        volume: f64,
        open_price: f64,
        sl: Option<f64>,
    ) -> Ticket {
        let mut b = self.book.borrow_mut();
        let ticket = b.next_ticket;
        b.next_ticket += 1;
        b.positions.insert(
            ticket,
            PaperPosition {
                ticket,
                symbol: symbol.to_string(),
                side,
                volume,
                open_price,
                sl,
                tp: None,
            },
        );
        ticket
    }

    pub fn position(&self, ticket: Ticket) -> Option<PaperPosition> {
        self.book.borrow().positions.get(&ticket).cloned()
    }

    pub fn open_tickets(&self) -> Vec<Ticket> {
        self.book.borrow().positions.keys().copied().collect()
    }

    // ---------------------------------------------------------------------
    // Failure injection / journal
    // ---------------------------------------------------------------------

    pub fn script_send(&self, result: Result<OrderResult, VenueError>) {
        self.scripted_sends.borrow_mut().push_back(result);
    }

    pub fn script_modify(&self, result: Result<OrderResult, VenueError>) {
        self.scripted_modifies.borrow_mut().push_back(result);
    }

    /// The next `n` snapshots fail.
    pub fn fail_snapshots(&self, n: u32) {
        self.snapshot_failures.set(n);
    }

    pub fn journal(&self) -> Vec<VenueCall> {
        self.journal.borrow().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.borrow_mut().clear();
    }

    pub fn sends_for(&self, ticket: Ticket) -> usize {
        self.journal
            .borrow()
            .iter()
            .filter(|c| matches!(c, VenueCall::Send { ticket: t, .. } if *t == ticket))
            .count()
    }

    pub fn modifies_for(&self, ticket: Ticket) -> usize {
        self.journal
            .borrow()
            .iter()
            .filter(|c| matches!(c, VenueCall::Modify { ticket: t, .. } if *t == ticket))
            .count()
    }

    fn record(&self, call: VenueCall) {
        self.journal.borrow_mut().push(call);
    }

    fn apply_close(&self, req: &OrderRequest) -> OrderResult {
        let mut b = self.book.borrow_mut();
        let Some(pos) = b.positions.get(&req.ticket).cloned() else {
            return OrderResult::rejected(RETCODE_POSITION_CLOSED, "position closed");
        };

        let filled = req.volume.min(pos.volume);
        let realized = b
            .symbols
            .get(&pos.symbol)
            .map(|info| signed_pnl(&pos, req.price, info) * filled / pos.volume.max(f64::EPSILON))
            .unwrap_or(0.0);
        b.account.balance += realized;

        if pos.volume - filled <= 1e-9 {
            b.positions.remove(&req.ticket);
        } else if let Some(p) = b.positions.get_mut(&req.ticket) {
            p.volume -= filled;
        }
        OrderResult::done(req.price, filled)
    }
}

fn signed_pnl(pos: &PaperPosition, price: f64, info: &SymbolInfo) -> f64 {
    let diff = match pos.side {
        Side::Buy => price - pos.open_price,
        Side::Sell => pos.open_price - price,
    };
    let money = risk_money_per_lot(diff.abs(), info, price) * pos.volume;
    if diff < 0.0 {
        -money
    } else {
        money
    }
}

impl AccountSource for PaperVenue {
    fn snapshot(&self) -> Result<AccountSnapshot, VenueError> {
        self.record(VenueCall::Snapshot);
        let left = self.snapshot_failures.get();
        if left > 0 {
            self.snapshot_failures.set(left - 1);
            return Err(VenueError::new("terminal not connected"));
        }

        let b = self.book.borrow();
        let equity = b.account.equity;
        let positions = b
            .positions
            .values()
            .map(|p| {
                let info = b.symbols.get(&p.symbol).cloned();
                let current_price = b.quotes.get(&p.symbol).map(|q| match p.side {
                    Side::Buy => q.bid,
                    Side::Sell => q.ask,
                });
                let floating_pnl = match (&info, current_price) {
                    (Some(i), Some(px)) => signed_pnl(p, px, i),
                    _ => 0.0,
                };
                let mut pos = Position {
                    ticket: p.ticket,
                    symbol: p.symbol.clone(),
                    side: p.side,
                    volume: p.volume,
                    open_price: p.open_price,
                    current_price,
                    sl: p.sl,
                    tp: p.tp,
                    floating_pnl,
                    risk_money: None,
                    risk_pct: None,
                    symbol_info: info,
                };
                pos.annotate_risk(equity);
                pos
            })
            .collect();

        Ok(AccountSnapshot {
            account: b.account.clone(),
            positions,
            captured_at: Utc::now(),
        })
    }
}

impl OrderExecution for PaperVenue {
    fn quote(&self, symbol: &str) -> Result<Quote, VenueError> {
        self.record(VenueCall::Quote {
            symbol: symbol.to_string(),
        });
        self.book
            .borrow()
            .quotes
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::new(format!("no quote for {symbol}")))
    }

    fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, VenueError> {
        self.book
            .borrow()
            .symbols
            .get(symbol)
            .cloned()
            .ok_or_else(|| VenueError::new(format!("symbol unavailable: {symbol}")))
    }

    fn send_order(&self, req: &OrderRequest) -> Result<OrderResult, VenueError> {
        self.record(VenueCall::Send {
            ticket: req.ticket,
            side: req.side,
            fill: req.fill,
            deviation: req.deviation,
            price: req.price,
        });

        let scripted = self.scripted_sends.borrow_mut().pop_front();
        if let Some(res) = scripted {
            return match res {
                Ok(r) if r.is_done() => Ok(self.apply_close(req)),
                other => other,
            };
        }
        if !self.automation_enabled() {
            return Ok(OrderResult::rejected(
                RETCODE_AUTOMATION_DISABLED,
                "AutoTrading disabled by client",
            ));
        }
        Ok(self.apply_close(req))
    }

    fn modify_position(&self, req: &ModifyRequest) -> Result<OrderResult, VenueError> {
        self.record(VenueCall::Modify {
            ticket: req.ticket,
            sl: req.sl,
            tp: req.tp,
        });

        let scripted = self.scripted_modifies.borrow_mut().pop_front();
        match scripted {
            Some(Ok(r)) if !r.is_done() => return Ok(r),
            Some(Err(e)) => return Err(e),
            Some(Ok(_)) => {}
            None => {
                if !self.automation_enabled() {
                    return Ok(OrderResult::rejected(
                        RETCODE_AUTOMATION_DISABLED,
                        "AutoTrading disabled by client",
                    ));
                }
            }
        }

        let mut b = self.book.borrow_mut();
        let Some(pos) = b.positions.get_mut(&req.ticket) else {
            return Ok(OrderResult::rejected(RETCODE_POSITION_CLOSED, "position closed"));
        };
        pos.sl = Some(req.sl).filter(|v| *v != 0.0);
        pos.tp = Some(req.tp).filter(|v| *v != 0.0);
        Ok(OrderResult::done(0.0, pos.volume))
    }
}

impl AutomationToggle for PaperVenue {
    fn enable(&self) -> bool {
        self.record(VenueCall::Enable);
        self.set_automation(true);
        true
    }

    fn disable(&self) -> bool {
        self.record(VenueCall::Disable);
        self.set_automation(false);
        true
    }
}
