//! rg-runtime
//!
//! Orchestration of the rule modules against one account.
//! - `Engine::tick`: pause check, lock maintenance, snapshot, then
//!   per-trade → aggregate → drawdown → breach with per-module isolation.
//! - `run_loop`: fixed-interval driver with cooperative shutdown.
//! - `Services`: store, event log and notifier built from `RiskGuardConfig`.

mod alerts;
mod engine;
mod run;
mod wiring;

pub use alerts::{
    build_limiter, KIND_DD_KILL, KIND_LIMITS, KIND_PAUSED, KIND_PER_TRADE, KIND_SNAPSHOT_STALE,
};
pub use engine::{Engine, ModuleError, TickReport, Venue};
pub use run::{loop_interval, run_loop};
pub use wiring::{build_notifier, file_notifier, Services};
