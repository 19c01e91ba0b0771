//! rg-execution
//!
//! Venue boundary for the enforcement engine.
//! - `venue`: the capabilities consumed from the trading venue (snapshot,
//!   quotes, order send / modify, automated-execution switch).
//! - `closer`: the single choke-point through which every rule module closes a
//!   position or adjusts its protective levels, with bounded escalation.
//! - `pause`: advisory marker present while a close / modify is in flight.

mod closer;
mod pause;
mod types;
mod venue;

pub use closer::{CloserConfig, ExecOutcome, ExecPath, ExecStep, ExecTrail, PositionCloser};
pub use pause::{is_paused, marker_age, reclaim_marker, PauseGuard, PAUSE_MARKER_FILE};
pub use types::{
    safe_comment, FillMode, ModifyRequest, OrderRequest, OrderResult, VenueError,
    AUTOMATION_DISABLED_CODES, COMMENT_MAX_LEN, RETCODE_DONE,
};
pub use venue::{AccountSource, AutomationToggle, NoToggle, OrderExecution};
