use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Process-lifetime cleanup list for cache artifacts.
///
/// Registries track every file they take ownership of here. Dropping the
/// last handle to the scope deletes all tracked files and then any tracked
/// directories that are left empty; that covers normal exit as well as
/// panic unwinding. Shutdown paths that bypass destructors (signal handlers,
/// `process::exit`) should call [`ArtifactScope::cleanup`] themselves.
#[derive(Debug, Default)]
pub struct ArtifactScope {
    files: Mutex<Vec<PathBuf>>,
    dirs: Mutex<Vec<PathBuf>>,
}

impl ArtifactScope {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn track(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut files = self.files.lock();
        if !files.contains(&path) {
            files.push(path);
        }
    }

    /// Track a directory removed (if empty) after all files.
    pub fn track_dir(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut dirs = self.dirs.lock();
        if !dirs.contains(&path) {
            dirs.push(path);
        }
    }

    /// Stop tracking `path`; returns whether it was tracked.
    pub fn untrack(&self, path: &Path) -> bool {
        let mut files = self.files.lock();
        let before = files.len();
        files.retain(|p| p != path);
        files.len() != before
    }

    pub fn tracked(&self) -> Vec<PathBuf> {
        self.files.lock().clone()
    }

    /// Hand every tracked artifact over to the caller; nothing is deleted.
    pub fn release(&self) -> Vec<PathBuf> {
        self.dirs.lock().clear();
        std::mem::take(&mut *self.files.lock())
    }

    /// Delete every tracked artifact now. Returns the number of files removed.
    pub fn cleanup(&self) -> usize {
        let files = std::mem::take(&mut *self.files.lock());
        let mut removed = 0;
        for path in files {
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    debug!("Removed artifact {}", path.display());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove artifact {}: {}", path.display(), e),
            }
        }

        let dirs = std::mem::take(&mut *self.dirs.lock());
        for dir in dirs.into_iter().rev() {
            // only empty directories go; anything else belongs to someone else
            let _ = fs::remove_dir(&dir);
        }
        removed
    }
}

impl Drop for ArtifactScope {
    fn drop(&mut self) {
        let removed = self.cleanup();
        if removed > 0 {
            debug!("Artifact scope dropped, removed {} files", removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dropping_the_scope_removes_tracked_files() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.cache");
        let b = dir.path().join("b.cache");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let scope = ArtifactScope::new();
        scope.track(&a);
        scope.track(&b);
        scope.track(&a);
        assert_eq!(scope.tracked().len(), 2);

        drop(scope);
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn cleanup_runs_during_panic_unwinding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doomed.cache");
        fs::write(&path, b"x").unwrap();

        let tracked = path.clone();
        let result = std::panic::catch_unwind(move || {
            let scope = ArtifactScope::new();
            scope.track(tracked);
            panic!("fold failed");
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn released_files_survive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kept.cache");
        fs::write(&path, b"x").unwrap();

        let scope = ArtifactScope::new();
        scope.track(&path);
        assert_eq!(scope.release(), vec![path.clone()]);
        drop(scope);
        assert!(path.exists());
    }

    #[test]
    fn untracked_files_are_left_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("moved.cache");
        fs::write(&path, b"x").unwrap();

        let scope = ArtifactScope::new();
        scope.track(&path);
        assert!(scope.untrack(&path));
        assert!(!scope.untrack(&path));
        assert_eq!(scope.cleanup(), 0);
        assert!(path.exists());
    }

    #[test]
    fn empty_tracked_dirs_are_removed() {
        let root = tempdir().unwrap();
        let ns = root.path().join("run-1");
        fs::create_dir_all(&ns).unwrap();
        let file = ns.join("fold0.cache");
        fs::write(&file, b"x").unwrap();

        let scope = ArtifactScope::new();
        scope.track_dir(&ns);
        scope.track(&file);
        assert_eq!(scope.cleanup(), 1);
        assert!(!ns.exists());
    }
}
