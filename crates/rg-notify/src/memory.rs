use crate::{Cursor, InboundMessage, Notifier, Poll};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};

#[derive(Clone, Debug, PartialEq)]
pub struct SentAlert {
    pub kind: String,
    pub lines: Vec<String>,
}

impl SentAlert {
    pub fn body(&self) -> String {
        self.lines.join("\n")
    }
}

/// In-process channel with a scripted inbox. Cursor = inbox index.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: RefCell<Vec<SentAlert>>,
    inbox: RefCell<Vec<InboundMessage>>,
    failing: Cell<bool>,
    poll_failing: Cell<bool>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, text: &str, ts: DateTime<Utc>) {
        self.inbox.borrow_mut().push(InboundMessage {
            text: text.to_string(),
            ts,
            from_bot: false,
        });
    }

    pub fn push_bot_message(&self, text: &str, ts: DateTime<Utc>) {
        self.inbox.borrow_mut().push(InboundMessage {
            text: text.to_string(),
            ts,
            from_bot: true,
        });
    }

    /// Make `notify` report failure (alerts are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn set_poll_failing(&self, failing: bool) {
        self.poll_failing.set(failing);
    }

    pub fn sent(&self) -> Vec<SentAlert> {
        self.sent.borrow().clone()
    }

    pub fn sent_of_kind(&self, kind: &str) -> Vec<SentAlert> {
        self.sent
            .borrow()
            .iter()
            .filter(|a| a.kind == kind)
            .cloned()
            .collect()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, kind: &str, lines: &[String]) -> bool {
        self.sent.borrow_mut().push(SentAlert {
            kind: kind.to_string(),
            lines: lines.to_vec(),
        });
        !self.failing.get()
    }

    fn poll_decisions(&self, cursor: Option<Cursor>) -> Result<Poll> {
        if self.poll_failing.get() {
            bail!("scripted poll failure");
        }
        let inbox = self.inbox.borrow();
        let start = (cursor.unwrap_or(0) as usize).min(inbox.len());
        Ok(Poll {
            messages: inbox[start..].to_vec(),
            next_cursor: Some(inbox.len() as Cursor),
        })
    }
}
