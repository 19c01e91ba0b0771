use rg_schemas::{AccountInfo, Quote, Side, SymbolInfo, Ticket};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One open position as the paper venue stores it. Risk fields are derived
/// at snapshot time, never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaperPosition {
    pub ticket: Ticket,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub open_price: f64,
    #[serde(default)]
    pub sl: Option<f64>,
    #[serde(default)]
    pub tp: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn default_first_ticket() -> Ticket {
    1
}

/// Whole venue state. This is also the on-disk format used by `rg tick --venue`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaperBook {
    pub account: AccountInfo,
    #[serde(default)]
    pub symbols: BTreeMap<String, SymbolInfo>,
    #[serde(default)]
    pub quotes: BTreeMap<String, Quote>,
    #[serde(default)]
    pub positions: BTreeMap<Ticket, PaperPosition>,
    /// The venue's automated-execution switch. Sends are refused while off.
    #[serde(default = "default_true")]
    pub automation_enabled: bool,
    #[serde(default = "default_first_ticket")]
    pub next_ticket: Ticket,
}

impl PaperBook {
    pub fn new(login: u64, equity: f64) -> Self {
        Self {
            account: AccountInfo {
                login,
                server: "paper".to_string(),
                currency: "USD".to_string(),
                equity,
                balance: equity,
            },
            symbols: BTreeMap::new(),
            quotes: BTreeMap::new(),
            positions: BTreeMap::new(),
            automation_enabled: true,
            next_ticket: 1,
        }
    }
}

/// EURUSD-like metadata: 5 digits, 1.0 account money per tick per lot.
pub fn fx_symbol(symbol: &str) -> SymbolInfo {
    SymbolInfo {
        symbol: symbol.to_string(),
        digits: 5,
        point: 0.00001,
        tick_size: 0.00001,
        tick_value: 1.0,
        contract_size: 100_000.0,
        volume_min: 0.01,
    }
}
