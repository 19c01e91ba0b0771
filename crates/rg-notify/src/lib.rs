//! rg-notify
//!
//! Human-facing channel used by the enforcement engine: push alerts out,
//! pull short decision replies ("1" / "2") back in.
//!
//! The concrete chat transport lives outside this workspace. What ships here:
//! - `NoopNotifier`: drops everything (composition-time default).
//! - `TracingNotifier`: renders alerts into the tracing stream.
//! - `FileNotifier`: JSONL outbox + inbox on disk, so an operator (or the
//!   `rg reply` command) can answer prompts without a chat service.
//! - `MemoryNotifier`: scripted inbox + captured outbox for tests.
//!
//! Notifier failures are never errors for the caller: `notify` reports
//! `false` and the engine moves on.

mod file;
mod limiter;
mod memory;

pub use file::FileNotifier;
pub use limiter::AlertLimiter;
pub use memory::{MemoryNotifier, SentAlert};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Opaque position in the inbound message stream.
pub type Cursor = u64;

/// One inbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub text: String,
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub from_bot: bool,
}

/// Result of one poll: messages after the cursor, and the cursor to pass next.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Poll {
    pub messages: Vec<InboundMessage>,
    pub next_cursor: Option<Cursor>,
}

pub trait Notifier {
    /// Push an alert. `kind` is a short title (`PER_TRADE`, `DD_KILL`, ...).
    fn notify(&self, kind: &str, lines: &[String]) -> bool;

    /// Messages strictly after `cursor` (`None` = from the beginning of what the
    /// channel still retains). Must be bounded in time.
    fn poll_decisions(&self, cursor: Option<Cursor>) -> Result<Poll>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _kind: &str, _lines: &[String]) -> bool {
        false
    }

    fn poll_decisions(&self, cursor: Option<Cursor>) -> Result<Poll> {
        Ok(Poll {
            messages: Vec::new(),
            next_cursor: cursor,
        })
    }
}

/// Alerts go to the log; there is no inbound side.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier {
    ident: String,
}

impl TracingNotifier {
    pub fn new(ident: impl Into<String>) -> Self {
        Self {
            ident: ident.into(),
        }
    }
}

impl Notifier for TracingNotifier {
    fn notify(&self, kind: &str, lines: &[String]) -> bool {
        info!(ident = %self.ident, kind, body = %lines.join(" | "), "alert");
        true
    }

    fn poll_decisions(&self, cursor: Option<Cursor>) -> Result<Poll> {
        Ok(Poll {
            messages: Vec::new(),
            next_cursor: cursor,
        })
    }
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn notify(&self, kind: &str, lines: &[String]) -> bool {
        (**self).notify(kind, lines)
    }

    fn poll_decisions(&self, cursor: Option<Cursor>) -> Result<Poll> {
        (**self).poll_decisions(cursor)
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self, kind: &str, lines: &[String]) -> bool {
        (**self).notify(kind, lines)
    }

    fn poll_decisions(&self, cursor: Option<Cursor>) -> Result<Poll> {
        (**self).poll_decisions(cursor)
    }
}

/// Strict decision token: the trimmed text is exactly `1` or `2`.
pub fn decision_token(text: &str) -> Option<u8> {
    match text.trim() {
        "1" => Some(1),
        "2" => Some(2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_token_is_strict() {
        assert_eq!(decision_token(" 1 "), Some(1));
        assert_eq!(decision_token("2\n"), Some(2));
        assert_eq!(decision_token("12"), None);
        assert_eq!(decision_token("yes"), None);
        assert_eq!(decision_token(""), None);
    }

    #[test]
    fn noop_keeps_cursor() {
        let p = NoopNotifier.poll_decisions(Some(9)).unwrap();
        assert!(p.messages.is_empty());
        assert_eq!(p.next_cursor, Some(9));
        assert!(!NoopNotifier.notify("X", &[]));
    }
}
