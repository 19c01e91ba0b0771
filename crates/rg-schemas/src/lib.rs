//! rg-schemas
//!
//! Read-only account snapshot consumed by every rule module once per tick,
//! plus the exposure / stop-loss arithmetic shared by the venue adapters and
//! the per-trade enforcer.
//!
//! A snapshot is a value: nothing in here talks to a venue or a clock.

mod risk;

pub use risk::{risk_money_per_lot, stop_loss_for_risk, StopLossError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Venue-assigned position identifier. Stable for the lifetime of the position.
pub type Ticket = u64;

/// Tolerance used for every "greater than the limit" comparison on percentages.
pub const PCT_EPSILON: f64 = 1e-9;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Direction of the order that flattens a position on this side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Symbol metadata needed to convert price distances into account money.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub digits: u32,
    pub point: f64,
    #[serde(default)]
    pub tick_size: f64,
    #[serde(default)]
    pub tick_value: f64,
    #[serde(default)]
    pub contract_size: f64,
    #[serde(default)]
    pub volume_min: f64,
}

impl SymbolInfo {
    /// Round a price to the symbol's quoted precision.
    pub fn round_price(&self, price: f64) -> f64 {
        let factor = 10f64.powi(self.digits as i32);
        (price * factor).round() / factor
    }

    /// Half a point: two levels closer than this are the same level on the venue.
    pub fn half_point(&self) -> f64 {
        if self.point > 0.0 {
            self.point / 2.0
        } else {
            1e-9
        }
    }
}

/// Best bid / ask for a symbol at the moment of the call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    /// Price at which an order on `side` executes (buy at ask, sell at bid).
    pub fn price_for(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        }
    }
}

/// One open position as reported by the venue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: Ticket,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub open_price: f64,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub sl: Option<f64>,
    #[serde(default)]
    pub tp: Option<f64>,
    #[serde(default)]
    pub floating_pnl: f64,
    /// Money lost if the stop-loss is hit. `None` when there is no stop-loss.
    #[serde(default)]
    pub risk_money: Option<f64>,
    /// `risk_money` as a percentage of equity. `None` when there is no stop-loss.
    #[serde(default)]
    pub risk_pct: Option<f64>,
    #[serde(default)]
    pub symbol_info: Option<SymbolInfo>,
}

impl Position {
    /// Venues report "no stop" as either absent or 0.0.
    pub fn stop_loss(&self) -> Option<f64> {
        self.sl.filter(|v| *v != 0.0)
    }

    pub fn take_profit(&self) -> Option<f64> {
        self.tp.filter(|v| *v != 0.0)
    }

    pub fn missing_sl(&self) -> bool {
        self.stop_loss().is_none()
    }

    /// Whether the position breaks the per-trade rule for `max_risk_pct`.
    pub fn violates(&self, max_risk_pct: f64) -> bool {
        if self.missing_sl() {
            return true;
        }
        matches!(self.risk_pct, Some(r) if r > max_risk_pct + PCT_EPSILON)
    }

    /// Recompute `risk_money` / `risk_pct` from the stop-loss and symbol metadata.
    pub fn annotate_risk(&mut self, equity: f64) {
        let (Some(sl), Some(info)) = (self.stop_loss(), self.symbol_info.as_ref()) else {
            self.risk_money = None;
            self.risk_pct = None;
            return;
        };
        let price_ref = self.current_price.unwrap_or(self.open_price);
        let per_lot = risk_money_per_lot((self.open_price - sl).abs(), info, price_ref);
        let money = per_lot * self.volume;
        self.risk_money = Some(money);
        self.risk_pct = if equity > 0.0 {
            Some(money / equity * 100.0)
        } else {
            None
        };
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: u64,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub currency: String,
    pub equity: f64,
    pub balance: f64,
}

/// Stop-loss based exposure aggregated over all positions that carry a stop.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    pub by_symbol: BTreeMap<String, f64>,
    pub total_risk_money: f64,
    pub total_risk_pct: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account: AccountInfo,
    pub positions: Vec<Position>,
    pub captured_at: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn equity(&self) -> f64 {
        self.account.equity
    }

    pub fn tickets(&self) -> BTreeSet<Ticket> {
        self.positions.iter().map(|p| p.ticket).collect()
    }

    pub fn position(&self, ticket: Ticket) -> Option<&Position> {
        self.positions.iter().find(|p| p.ticket == ticket)
    }

    /// Positions without a stop-loss contribute nothing here; the per-trade
    /// rule is what catches them.
    pub fn exposure(&self) -> Exposure {
        let mut out = Exposure::default();
        for p in &self.positions {
            if let Some(money) = p.risk_money {
                *out.by_symbol.entry(p.symbol.clone()).or_insert(0.0) += money;
                out.total_risk_money += money;
            }
        }
        let equity = self.equity();
        out.total_risk_pct = if equity > 0.0 {
            out.total_risk_money / equity * 100.0
        } else {
            0.0
        };
        out
    }
}
