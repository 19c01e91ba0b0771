//! Capabilities the engine consumes from the trading venue.
//!
//! Implementations: `rg-broker-paper` (in-memory / file-backed) and whatever
//! terminal bridge a deployment provides. All calls are synchronous and must
//! be bounded in time by the implementation.

use crate::types::{ModifyRequest, OrderRequest, OrderResult, VenueError};
use rg_schemas::{AccountSnapshot, Quote, SymbolInfo};

// ---------------------------------------------------------------------------
// Account / position source
// ---------------------------------------------------------------------------

pub trait AccountSource {
    /// Fresh snapshot. Must fail rather than return stale data.
    fn snapshot(&self) -> Result<AccountSnapshot, VenueError>;
}

// ---------------------------------------------------------------------------
// Order execution
// ---------------------------------------------------------------------------

pub trait OrderExecution {
    fn quote(&self, symbol: &str) -> Result<Quote, VenueError>;
    fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, VenueError>;
    fn send_order(&self, req: &OrderRequest) -> Result<OrderResult, VenueError>;
    fn modify_position(&self, req: &ModifyRequest) -> Result<OrderResult, VenueError>;
}

// ---------------------------------------------------------------------------
// Automated-execution switch
// ---------------------------------------------------------------------------

/// Best-effort. `false` means "could not confirm"; callers assume unchanged.
pub trait AutomationToggle {
    fn enable(&self) -> bool;
    fn disable(&self) -> bool;
}

/// For venues without a switch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoToggle;

impl AutomationToggle for NoToggle {
    fn enable(&self) -> bool {
        false
    }

    fn disable(&self) -> bool {
        false
    }
}

impl<T: AccountSource + ?Sized> AccountSource for &T {
    fn snapshot(&self) -> Result<AccountSnapshot, VenueError> {
        (**self).snapshot()
    }
}

impl<T: OrderExecution + ?Sized> OrderExecution for &T {
    fn quote(&self, symbol: &str) -> Result<Quote, VenueError> {
        (**self).quote(symbol)
    }

    fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, VenueError> {
        (**self).symbol_info(symbol)
    }

    fn send_order(&self, req: &OrderRequest) -> Result<OrderResult, VenueError> {
        (**self).send_order(req)
    }

    fn modify_position(&self, req: &ModifyRequest) -> Result<OrderResult, VenueError> {
        (**self).modify_position(req)
    }
}

impl<T: AutomationToggle + ?Sized> AutomationToggle for &T {
    fn enable(&self) -> bool {
        (**self).enable()
    }

    fn disable(&self) -> bool {
        (**self).disable()
    }
}
