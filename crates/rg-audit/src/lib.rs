//! rg-audit
//!
//! Structured event log for the enforcement engine. One JSON object per line,
//! one file per calendar month (`<dir>/<YYYY>-<MM>-riskguard.log`).
//!
//! Logging is fire-and-forget: `EventLogger::log_event` never returns an
//! error, so a full disk or a permission problem can not abort an
//! enforcement tick. Lines that could not be written are diverted to
//! `logger_errors.log` in the same directory.
//!
//! Optional hash chain: each line can carry `hash_prev` + `hash_self`.

mod chain;
mod jsonl;

pub use chain::{compute_entry_hash, verify_hash_chain, verify_hash_chain_str, VerifyResult};
pub use jsonl::{month_file_name, JsonlEventLog, ERROR_FILE_NAME};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

/// One logged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub context: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_prev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_self: Option<String>,
}

impl LogEntry {
    pub fn new(ts: DateTime<Utc>, event_type: &str, payload: Value, context: Value) -> Self {
        Self {
            ts,
            event_type: event_type.to_uppercase(),
            payload: empty_object_if_null(payload),
            context: empty_object_if_null(context),
            hash_prev: None,
            hash_self: None,
        }
    }
}

fn empty_object_if_null(v: Value) -> Value {
    if v.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        v
    }
}

/// Sink for structured events.
///
/// `event_type` is a category such as `CLOSE`, `LIMITS`, `DD_KILL`,
/// `PER_TRADE`, `BLOCK_BREACH` or `ERROR`; it is upper-cased on write.
/// `context` carries standard fields (`account`, `server`, `module`).
pub trait EventLogger {
    fn log_event(&self, event_type: &str, payload: Value, context: Value);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventLog;

impl EventLogger for NoopEventLog {
    fn log_event(&self, _event_type: &str, _payload: Value, _context: Value) {}
}

/// Keeps entries in memory. Used by tests and by the CLI's dry paths.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Entries of the given (upper-case) type, in write order.
    pub fn of_type(&self, event_type: &str) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl EventLogger for MemoryEventLog {
    fn log_event(&self, event_type: &str, payload: Value, context: Value) {
        let entry = LogEntry::new(Utc::now(), event_type, payload, context);
        match self.entries.lock() {
            Ok(mut g) => g.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

impl<L: EventLogger + ?Sized> EventLogger for &L {
    fn log_event(&self, event_type: &str, payload: Value, context: Value) {
        (**self).log_event(event_type, payload, context)
    }
}

impl<L: EventLogger + ?Sized> EventLogger for Box<L> {
    fn log_event(&self, event_type: &str, payload: Value, context: Value) {
        (**self).log_event(event_type, payload, context)
    }
}
