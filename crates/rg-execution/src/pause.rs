use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

pub const PAUSE_MARKER_FILE: &str = ".guard_lock";

/// Advisory "closing in progress" marker. Present while the guard lives.
///
/// A process killed mid-close leaves the file behind; readers use
/// [`marker_age`] and [`reclaim_marker`] to tell that apart from a close
/// that is still running.
#[derive(Debug)]
pub struct PauseGuard {
    path: PathBuf,
}

impl PauseGuard {
    /// Best-effort: a marker that can not be written is logged and skipped.
    pub fn engage(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref().to_path_buf();
        let body = format!("pid={} at={}\n", std::process::id(), Utc::now().to_rfc3339());
        match fs::write(&path, body) {
            Ok(()) => Some(Self { path }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "pause marker not written");
                None
            }
        }
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub fn is_paused(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}

/// Time since the marker was last written, `None` when there is no marker.
/// A modification time in the future counts as zero.
pub fn marker_age(path: impl AsRef<Path>) -> Result<Option<Duration>> {
    let path = path.as_ref();
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("stat pause marker {}", path.display()))
        }
    };
    let modified = meta
        .modified()
        .with_context(|| format!("mtime of pause marker {}", path.display()))?;
    Ok(Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    ))
}

/// Remove a marker left behind by a dead closer. `false` if it was already gone.
pub fn reclaim_marker(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("remove pause marker {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_exists_only_while_guard_lives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PAUSE_MARKER_FILE);
        {
            let _g = PauseGuard::engage(&path).unwrap();
            assert!(is_paused(&path));
            assert!(marker_age(&path).unwrap().unwrap() < Duration::from_secs(5));
        }
        assert!(!is_paused(&path));
        assert_eq!(marker_age(&path).unwrap(), None);
    }

    #[test]
    fn leftover_marker_can_be_reclaimed_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PAUSE_MARKER_FILE);
        fs::write(&path, "pid=1\n").unwrap();
        assert!(reclaim_marker(&path).unwrap());
        assert!(!is_paused(&path));
        assert!(!reclaim_marker(&path).unwrap());
    }
}
