//! Configuration file change detection

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use crate::metrics::Counter;

/// Tracks the modification time of the configuration file
///
/// The recorded time only advances on a successful reload, so a broken file
/// is retried (and counted as a failure) on every scrape until it is fixed.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Mutex<Option<SystemTime>>,
}

impl ConfigWatcher {
    /// Start watching `path`, treating its current state as loaded
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            last_modified: Mutex::new(last_modified),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time of the file if it is newer than the last reload
    pub fn changed(&self) -> Option<SystemTime> {
        let current = modified(&self.path)?;
        let last = *self.last_modified.lock().unwrap_or_else(PoisonError::into_inner);
        match last {
            Some(last) if current <= last => None,
            _ => Some(current),
        }
    }

    /// Record that the file as of `mtime` is now active
    pub fn mark_loaded(&self, mtime: SystemTime) {
        let mut last = self.last_modified.lock().unwrap_or_else(PoisonError::into_inner);
        if last.map_or(true, |l| mtime > l) {
            *last = Some(mtime);
        }
    }

    /// Current modification time of the file, if readable
    pub fn current(&self) -> Option<SystemTime> {
        modified(&self.path)
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Reload outcomes since start
#[derive(Debug, Default)]
pub struct ReloadStats {
    pub success: Counter,
    pub failure: Counter,
}
