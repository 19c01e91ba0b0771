//! rg-risk
//!
//! The rule modules of the enforcement engine.
//! - `per_trade`: stop-loss presence / per-position risk (immediate close or
//!   interactive stop-loss adjustment with an operator decision window)
//! - `aggregate`: total stop-loss exposure with a baseline and a latching block
//! - `drawdown`: peak-to-equity kill switch, cooldown, secret unlock
//! - `execution_lock`: persisted "trading disabled until" horizon
//! - `breach`: once-per-ticket report of positions seen while blocked
//!
//! Modules keep no in-memory state between calls. Everything they remember
//! lives in `rg-state` documents; everything they touch comes in through an
//! `EngineContext`.

pub mod aggregate;
pub mod breach;
mod clock;
mod context;
pub mod drawdown;
pub mod execution_lock;
pub mod per_trade;
mod secret;

pub use aggregate::{AggregateConfig, AggregateReport, AggregateState};
pub use breach::{BlockState, BreachCache, BreachReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{CloseRecord, EngineContext};
pub use drawdown::{DrawdownConfig, DrawdownReport, DrawdownState, DrawdownStatus, UnlockReport};
pub use execution_lock::{ExecutionLockState, LockStatus};
pub use per_trade::{
    DecisionStatus, PerTradeConfig, PerTradeMode, PerTradeReport, PerTradeState, TicketDecision,
};
pub use secret::{hash_secret, verify_secret, SecretError, MIN_SECRET_LEN};
