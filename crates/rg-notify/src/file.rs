use crate::{Cursor, InboundMessage, Notifier, Poll};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const OUTBOX_FILE: &str = "outbox.jsonl";
pub const INBOX_FILE: &str = "inbox.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct OutboxRecord {
    ts: DateTime<Utc>,
    ident: String,
    kind: String,
    lines: Vec<String>,
}

/// File-backed channel. The cursor is the number of inbox lines already seen.
#[derive(Debug, Clone)]
pub struct FileNotifier {
    dir: PathBuf,
    ident: String,
}

impl FileNotifier {
    pub fn new(dir: impl AsRef<Path>, ident: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create notify dir {:?}", dir))?;
        Ok(Self {
            dir,
            ident: ident.into(),
        })
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.dir.join(OUTBOX_FILE)
    }

    pub fn inbox_path(&self) -> PathBuf {
        self.dir.join(INBOX_FILE)
    }

    /// Operator reply, as if typed into the chat.
    pub fn reply(&self, text: &str, ts: DateTime<Utc>) -> Result<()> {
        let msg = InboundMessage {
            text: text.trim().to_string(),
            ts,
            from_bot: false,
        };
        let line = serde_json::to_string(&msg).context("serialize reply")?;
        append_line(&self.inbox_path(), &line)
    }

    fn try_notify(&self, kind: &str, lines: &[String]) -> Result<()> {
        let rec = OutboxRecord {
            ts: Utc::now(),
            ident: self.ident.clone(),
            kind: kind.to_string(),
            lines: lines.to_vec(),
        };
        let line = serde_json::to_string(&rec).context("serialize alert")?;
        append_line(&self.outbox_path(), &line)
    }
}

impl Notifier for FileNotifier {
    fn notify(&self, kind: &str, lines: &[String]) -> bool {
        match self.try_notify(kind, lines) {
            Ok(()) => true,
            Err(e) => {
                warn!(kind, error = %e, "file notifier write failed");
                false
            }
        }
    }

    fn poll_decisions(&self, cursor: Option<Cursor>) -> Result<Poll> {
        let path = self.inbox_path();
        let content = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e).with_context(|| format!("read inbox {:?}", path)),
        };

        let skip = cursor.unwrap_or(0) as usize;
        let mut messages = Vec::new();
        let mut total = 0usize;
        for (i, line) in content.lines().enumerate() {
            total = i + 1;
            if i < skip || line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<InboundMessage>(line) {
                Ok(m) => messages.push(m),
                Err(e) => warn!(line = i + 1, error = %e, "skipping malformed inbox line"),
            }
        }

        Ok(Poll {
            messages,
            next_cursor: Some(total.max(skip) as Cursor),
        })
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {:?}", path))?;
    f.write_all(line.as_bytes())?;
    f.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_are_polled_once_per_cursor_advance() {
        let dir = tempfile::tempdir().unwrap();
        let n = FileNotifier::new(dir.path(), "demo").unwrap();

        let empty = n.poll_decisions(None).unwrap();
        assert!(empty.messages.is_empty());
        assert_eq!(empty.next_cursor, Some(0));

        n.reply("1", Utc::now()).unwrap();
        n.reply(" 2 ", Utc::now()).unwrap();

        let first = n.poll_decisions(Some(0)).unwrap();
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.messages[1].text, "2");
        assert_eq!(first.next_cursor, Some(2));

        let again = n.poll_decisions(first.next_cursor).unwrap();
        assert!(again.messages.is_empty());
    }

    #[test]
    fn alerts_are_appended_to_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let n = FileNotifier::new(dir.path(), "acct 7").unwrap();
        assert!(n.notify("DD_KILL", &["dd 21%".to_string()]));
        let body = fs::read_to_string(n.outbox_path()).unwrap();
        assert!(body.contains("DD_KILL"));
        assert!(body.contains("acct 7"));
    }
}
