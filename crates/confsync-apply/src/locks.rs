//! In-flight file locks
//!
//! The registry records which request is currently mutating which file in
//! this process. It is advisory: the validator reports a held file as a
//! violation and the updater refuses to touch it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fs2::FileExt;

/// Files currently held by in-flight requests
#[derive(Debug, Default)]
pub struct FileLockRegistry {
    held: DashMap<PathBuf, String>,
}

impl FileLockRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current holder of `path`, if any
    #[must_use]
    pub fn holder(&self, path: &Path) -> Option<String> {
        self.held.get(path).map(|h| h.value().clone())
    }

    /// Take `path` for `holder`
    ///
    /// # Errors
    /// Returns the current holder when the file is already taken
    pub fn try_acquire(self: &Arc<Self>, path: PathBuf, holder: &str) -> Result<FileLockGuard, String> {
        match self.held.entry(path.clone()) {
            Entry::Occupied(entry) => Err(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(holder.to_string());
                Ok(FileLockGuard {
                    registry: Arc::clone(self),
                    path,
                })
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Releases its file on drop
#[derive(Debug)]
pub struct FileLockGuard {
    registry: Arc<FileLockRegistry>,
    path: PathBuf,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        self.registry.held.remove(&self.path);
    }
}

/// Whether another process holds an advisory lock on `path`
///
/// Probes with a non-blocking exclusive lock that is released immediately.
/// Files that cannot be opened are reported unlocked; existence is checked
/// elsewhere.
#[must_use]
pub fn externally_locked(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(e) => e.raw_os_error() == fs2::lock_contended_error().raw_os_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_cycle() {
        let registry = FileLockRegistry::new();
        let path = PathBuf::from("/srv/lobby/server.properties");
        let guard = registry.try_acquire(path.clone(), "r1").unwrap();
        assert_eq!(registry.holder(&path).as_deref(), Some("r1"));
        assert_eq!(registry.try_acquire(path.clone(), "r2").unwrap_err(), "r1");
        drop(guard);
        assert!(registry.is_empty());
        assert!(registry.try_acquire(path, "r2").is_ok());
    }

    #[test]
    fn probe_sees_foreign_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "x: 1\n").unwrap();
        assert!(!externally_locked(&path));

        let holder = File::open(&path).unwrap();
        holder.lock_exclusive().unwrap();
        assert!(externally_locked(&path));
        FileExt::unlock(&holder).unwrap();
        assert!(!externally_locked(&path));
    }
}
