//! Cross-process advisory lock backed by a lock file.
//!
//! The lock is held while `<name>.lock` exists. Creation uses `create_new`,
//! which is atomic on every platform we run on, so two processes can never
//! both believe they own it. The file is removed when the guard drops,
//! including on early return and unwind.
//!
//! A process that dies while holding the lock leaves the file behind; a lock
//! file older than `stale_after` is reclaimed by the next contender.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

const RETRY_EVERY: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockPolicy {
    /// Give up acquiring after this long.
    pub timeout: Duration,
    /// Lock files older than this are considered abandoned.
    pub stale_after: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// Exclusive ownership of a lock file. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn acquire(path: impl AsRef<Path>, policy: LockPolicy) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    // Owner info is diagnostic only; failure to write it does not void the lock.
                    let _ = writeln!(f, "pid={} at={}", std::process::id(), Utc::now().to_rfc3339());
                    debug!(path = %path.display(), "state lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path, policy.stale_after) {
                        warn!(path = %path.display(), "reclaiming stale state lock");
                        match fs::remove_file(&path) {
                            Ok(()) => continue,
                            Err(e) if e.kind() == ErrorKind::NotFound => continue,
                            Err(e) => {
                                return Err(e).with_context(|| {
                                    format!("remove stale lock {}", path.display())
                                })
                            }
                        }
                    }
                    if started.elapsed() >= policy.timeout {
                        bail!(
                            "STATE_LOCK_TIMEOUT: could not acquire {} within {:?}",
                            path.display(),
                            policy.timeout
                        );
                    }
                    thread::sleep(RETRY_EVERY);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("create lock {}", path.display()));
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to release state lock");
            }
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > stale_after)
        .unwrap_or(false)
}
