//! rg-state
//!
//! Small JSON documents shared between engine instances (the polling loop
//! and direct CLI invocations). One document per rule module.
//!
//! Every read-modify-write holds the document's lock file for its whole
//! duration and replaces the document by renaming a fully written temp file
//! over it, so a reader never observes a half-written document.

mod lock;

pub use lock::{FileLock, LockPolicy};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Well-known document names.
pub mod docs {
    pub const AGGREGATE: &str = "aggregate";
    pub const DRAWDOWN: &str = "drawdown";
    pub const PER_TRADE: &str = "per_trade";
    pub const BREACH_CACHE: &str = "breach_cache";
    pub const EXECUTION_LOCK: &str = "execution_lock";
}

#[derive(Clone, Debug)]
pub struct StateStore {
    dir: PathBuf,
    policy: LockPolicy,
}

impl StateStore {
    /// Open (creating if needed) a state directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_policy(dir, LockPolicy::default())
    }

    pub fn with_policy(dir: impl AsRef<Path>, policy: LockPolicy) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create state dir {}", dir.display()))?;
        Ok(Self { dir, policy })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    fn lock_path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    /// Lock-free read. A missing or unreadable document yields the default.
    pub fn load<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.path_of(name);
        read_or_default(&path)
    }

    /// Locked read-modify-write. The closure's result is returned after the
    /// new document has been durably renamed into place.
    pub fn update<T, R, F>(&self, name: &str, f: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> R,
    {
        self.try_update(name, |doc| Ok(f(doc)))
    }

    /// Like `update`, but the closure may refuse; on `Err` nothing is written.
    pub fn try_update<T, R, F>(&self, name: &str, f: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let _guard = FileLock::acquire(self.lock_path_of(name), self.policy)?;
        let path = self.path_of(name);
        let mut doc: T = read_or_default(&path);
        let out = f(&mut doc)?;
        write_atomic(&path, &doc)?;
        Ok(out)
    }

    /// Replace the whole document.
    pub fn store<T>(&self, name: &str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        let _guard = FileLock::acquire(self.lock_path_of(name), self.policy)?;
        write_atomic(&self.path_of(name), value)
    }
}

fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "state read failed; using defaults");
            return T::default();
        }
    };
    if raw.trim().is_empty() {
        return T::default();
    }
    match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "state document unparsable; using defaults");
            T::default()
        }
    }
}

/// Serialize to a temp file in the target's directory, fsync, rename over.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;

    let body = serde_json::to_vec_pretty(value).context("serialize state document")?;
    tmp.write_all(&body)
        .with_context(|| format!("write temp for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("fsync temp for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("rename into {}", path.display()))?;

    debug!(path = %path.display(), bytes = body.len(), "state document written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeSet;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        #[serde(default)]
        counter: u32,
        #[serde(default)]
        seen: BTreeSet<u64>,
    }

    #[test]
    fn missing_document_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let d: Doc = store.load("nothing_here");
        assert_eq!(d, Doc::default());
    }

    #[test]
    fn corrupt_document_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        fs::write(store.path_of("doc"), "{ not json").unwrap();
        let d: Doc = store.load("doc");
        assert_eq!(d, Doc::default());
    }

    #[test]
    fn update_persists_and_returns_closure_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let n = store
            .update("doc", |d: &mut Doc| {
                d.counter += 2;
                d.seen.insert(42);
                d.counter
            })
            .unwrap();
        assert_eq!(n, 2);

        let d: Doc = store.load("doc");
        assert_eq!(d.counter, 2);
        assert!(d.seen.contains(&42));
        assert!(!dir.path().join("doc.lock").exists());
    }

    #[test]
    fn refused_update_leaves_document_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.store("doc", &Doc { counter: 5, seen: BTreeSet::new() }).unwrap();

        let res: Result<()> = store.try_update("doc", |d: &mut Doc| {
            d.counter = 999;
            anyhow::bail!("no")
        });
        assert!(res.is_err());

        let d: Doc = store.load("doc");
        assert_eq!(d.counter, 5);
        assert!(!dir.path().join("doc.lock").exists(), "lock released on error path");
    }

    #[test]
    fn concurrent_updates_do_not_lose_increments() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        s.update("doc", |d: &mut Doc| d.counter += 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let d: Doc = store.load("doc");
        assert_eq!(d.counter, 40);
    }
}
