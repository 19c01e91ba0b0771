use crate::chain::{canonical_json_line, compute_entry_hash};
use crate::{EventLogger, LogEntry};
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub const ERROR_FILE_NAME: &str = "logger_errors.log";

pub fn month_file_name(ts: DateTime<Utc>) -> String {
    format!("{:04}-{:02}-riskguard.log", ts.year(), ts.month())
}

/// Monthly JSON Lines event log.
pub struct JsonlEventLog {
    dir: PathBuf,
    hash_chain: bool,
    /// Last chained hash, tagged with the file it belongs to. Each month
    /// starts its own chain.
    last: Mutex<Option<(PathBuf, Option<String>)>>,
}

impl JsonlEventLog {
    pub fn new(dir: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create_dir_all {:?}", dir))?;
        Ok(Self {
            dir,
            hash_chain,
            last: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, ts: DateTime<Utc>) -> PathBuf {
        self.dir.join(month_file_name(ts))
    }

    pub fn current_path(&self) -> PathBuf {
        self.path_for(Utc::now())
    }

    /// Append one entry stamped `ts`. Errors are returned; `log_event` is the
    /// infallible wrapper.
    pub fn append_at(
        &self,
        ts: DateTime<Utc>,
        event_type: &str,
        payload: Value,
        context: Value,
    ) -> Result<LogEntry> {
        let path = self.path_for(ts);
        let mut entry = LogEntry::new(ts, event_type, payload, context);

        let mut last = match self.last.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        if self.hash_chain {
            let prev = match last.as_ref() {
                Some((p, h)) if *p == path => h.clone(),
                _ => read_last_hash(&path)?,
            };
            entry.hash_prev = prev;
            let self_hash = compute_entry_hash(&entry)?;
            entry.hash_self = Some(self_hash);
        }

        let line = canonical_json_line(&entry)?;
        append_line(&path, &line)?;

        if self.hash_chain {
            *last = Some((path, entry.hash_self.clone()));
        }
        Ok(entry)
    }

    fn divert(&self, err: &anyhow::Error, event_type: &str, payload: &Value, context: &Value) {
        let record = json!({
            "ts": Utc::now().to_rfc3339(),
            "type": "LOGGER_ERROR",
            "error": format!("{err:#}"),
            "entry": {
                "type": event_type.to_uppercase(),
                "payload": payload,
                "context": context,
            },
        });
        let written = fs::create_dir_all(&self.dir)
            .map_err(anyhow::Error::from)
            .and_then(|_| append_line(&self.dir.join(ERROR_FILE_NAME), &record.to_string()));
        if let Err(e) = written {
            warn!(error = %e, original = %err, "event log unavailable; entry dropped");
        }
    }
}

impl EventLogger for JsonlEventLog {
    fn log_event(&self, event_type: &str, payload: Value, context: Value) {
        // Keep copies for the error file; the happy path consumes the originals.
        let (p, c) = (payload.clone(), context.clone());
        if let Err(e) = self.append_at(Utc::now(), event_type, payload, context) {
            self.divert(&e, event_type, &p, &c);
        }
    }
}

fn read_last_hash(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("read event log {:?}", path))?;
    let Some(line) = content.lines().rev().find(|l| !l.trim().is_empty()) else {
        return Ok(None);
    };
    let entry: LogEntry = serde_json::from_str(line.trim())
        .with_context(|| format!("parse last entry of {:?}", path))?;
    Ok(entry.hash_self)
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open event log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write log line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}
