//! Cache artifact distribution.
//!
//! The cache builder only ever talks to [`FileRegistry`]. Which strategy is
//! wired in decides whether artifacts stay on the driving node
//! ([`LocalRegistry`]) or are published for every worker
//! ([`BroadcastRegistry`]).

use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fw_types::{validation_error, FwError, FwResult, StorageError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cleanup::ArtifactScope;

/// Register a local file under a logical name and resolve that name later.
pub trait FileRegistry: Send + Sync + Debug {
    /// Take ownership of `artifact` and publish it as `name`.
    ///
    /// The file at `artifact` is moved; callers must not use the path
    /// afterwards. Returns the logical name.
    fn save(&self, name: &str, artifact: &Path) -> FwResult<String>;

    /// Resolve a logical name to a readable local path.
    fn get(&self, name: &str) -> FwResult<PathBuf>;

    /// Withdraw a published artifact and delete its files.
    fn remove(&self, name: &str) -> FwResult<()>;

    /// Human-readable strategy name.
    fn strategy(&self) -> &str;
}

/// Bookkeeping for one published artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredArtifact {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub registered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Local strategy
// ---------------------------------------------------------------------------

/// Keeps artifacts in a directory on the driving node.
#[derive(Debug)]
pub struct LocalRegistry {
    root: PathBuf,
    entries: DashMap<String, RegisteredArtifact>,
    scope: Arc<ArtifactScope>,
}

impl LocalRegistry {
    pub fn new<P: AsRef<Path>>(root: P) -> FwResult<Self> {
        Self::with_scope(root, ArtifactScope::new())
    }

    pub fn with_scope<P: AsRef<Path>>(root: P, scope: Arc<ArtifactScope>) -> FwResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            entries: DashMap::new(),
            scope,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scope(&self) -> &Arc<ArtifactScope> {
        &self.scope
    }

    pub fn artifacts(&self) -> Vec<RegisteredArtifact> {
        let mut all: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

impl FileRegistry for LocalRegistry {
    fn save(&self, name: &str, artifact: &Path) -> FwResult<String> {
        check_name(name)?;
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => Err(FwError::Collision {
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                let dest = self.root.join(name);
                move_file(name, artifact, &dest)?;
                self.scope.track(&dest);
                let record = describe(name, dest)?;
                debug!(
                    "Saved {} ({} bytes) to {}",
                    name,
                    record.size_bytes,
                    record.path.display()
                );
                slot.insert(record);
                Ok(name.to_string())
            }
        }
    }

    fn get(&self, name: &str) -> FwResult<PathBuf> {
        match self.entries.get(name) {
            Some(entry) if entry.path.is_file() => Ok(entry.path.clone()),
            _ => Err(StorageError::NotFound {
                name: name.to_string(),
            }
            .into()),
        }
    }

    fn remove(&self, name: &str) -> FwResult<()> {
        let (_, entry) = self
            .entries
            .remove(name)
            .ok_or_else(|| StorageError::NotFound {
                name: name.to_string(),
            })?;
        self.scope.untrack(&entry.path);
        remove_if_present(&entry.path)?;
        debug!("Removed {}", name);
        Ok(())
    }

    fn strategy(&self) -> &str {
        "local"
    }
}

// ---------------------------------------------------------------------------
// Broadcast strategy
// ---------------------------------------------------------------------------

/// Where the broadcast strategy publishes and materializes artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Directory visible from every node (e.g. a cluster file system mount).
    pub shared_root: PathBuf,

    /// Node-local directory that receives fetched copies.
    pub local_root: PathBuf,

    /// Namespace for this run; keeps concurrent runs apart.
    pub namespace: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("foldwise");
        Self {
            shared_root: base.join("shared"),
            local_root: base.join("local"),
            namespace: "foldwise".to_string(),
        }
    }
}

impl BroadcastConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.shared_root.join(&self.namespace)
    }

    pub fn local_dir(&self) -> PathBuf {
        self.local_root.join(&self.namespace)
    }
}

/// Publishes artifacts to a shared location; any node resolves them by name.
///
/// The driver calls `save`. Workers build their own registry from the same
/// [`BroadcastConfig`] (with their own `local_root`) and call `get`, which
/// copies the artifact into node-local storage on first use.
#[derive(Debug)]
pub struct BroadcastRegistry {
    config: BroadcastConfig,
    shared_dir: PathBuf,
    local_dir: PathBuf,
    published: DashMap<String, RegisteredArtifact>,
    materialized: DashMap<String, PathBuf>,
    fetch_locks: DashMap<String, Arc<Mutex<()>>>,
    scope: Arc<ArtifactScope>,
}

impl BroadcastRegistry {
    pub fn new(config: BroadcastConfig) -> FwResult<Self> {
        Self::with_scope(config, ArtifactScope::new())
    }

    pub fn with_scope(config: BroadcastConfig, scope: Arc<ArtifactScope>) -> FwResult<Self> {
        check_name(&config.namespace)?;
        let shared_dir = config.shared_dir();
        let local_dir = config.local_dir();
        fs::create_dir_all(&shared_dir)?;
        fs::create_dir_all(&local_dir)?;
        scope.track_dir(&shared_dir);
        scope.track_dir(&local_dir);

        info!(
            "Broadcast registry ready: namespace={}, shared={}",
            config.namespace,
            shared_dir.display()
        );
        Ok(Self {
            config,
            shared_dir,
            local_dir,
            published: DashMap::new(),
            materialized: DashMap::new(),
            fetch_locks: DashMap::new(),
            scope,
        })
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    pub fn scope(&self) -> &Arc<ArtifactScope> {
        &self.scope
    }

    pub fn published(&self) -> Vec<RegisteredArtifact> {
        let mut all: Vec<_> = self.published.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

impl FileRegistry for BroadcastRegistry {
    fn save(&self, name: &str, artifact: &Path) -> FwResult<String> {
        check_name(name)?;
        match self.published.entry(name.to_string()) {
            Entry::Occupied(_) => Err(FwError::Collision {
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                let dest = self.shared_dir.join(name);
                move_file(name, artifact, &dest)?;
                self.scope.track(&dest);
                let record = describe(name, dest)?;
                info!(
                    "Published {} ({} bytes) in namespace {}",
                    name, record.size_bytes, self.config.namespace
                );
                slot.insert(record);
                Ok(name.to_string())
            }
        }
    }

    fn get(&self, name: &str) -> FwResult<PathBuf> {
        check_name(name)?;
        if let Some(path) = self.materialized.get(name).map(|p| p.clone()) {
            if path.is_file() {
                return Ok(path);
            }
        }

        let source = self.shared_dir.join(name);
        if !source.is_file() {
            return Err(StorageError::NotFound {
                name: name.to_string(),
            }
            .into());
        }

        // one fetch per name at a time; no map guard is held across the copy
        let lock = self
            .fetch_locks
            .entry(name.to_string())
            .or_default()
            .clone();
        let _fetching = lock.lock();

        let local = self.local_dir.join(name);
        if !local.is_file() {
            copy_atomic(&source, &local)?;
            debug!("Materialized {} at {}", name, local.display());
        }
        self.scope.track(&local);
        self.materialized.insert(name.to_string(), local.clone());
        Ok(local)
    }

    fn remove(&self, name: &str) -> FwResult<()> {
        let published = self.published.remove(name);
        let materialized = self.materialized.remove(name);
        self.fetch_locks.remove(name);
        if published.is_none() && materialized.is_none() {
            return Err(StorageError::NotFound {
                name: name.to_string(),
            }
            .into());
        }

        if let Some((_, entry)) = published {
            self.scope.untrack(&entry.path);
            remove_if_present(&entry.path)?;
        }
        if let Some((_, path)) = materialized {
            self.scope.untrack(&path);
            remove_if_present(&path)?;
        }
        debug!("Withdrew {} from namespace {}", name, self.config.namespace);
        Ok(())
    }

    fn strategy(&self) -> &str {
        "broadcast"
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Logical names double as file names, so they must be a single plain component.
pub(crate) fn check_name(name: &str) -> FwResult<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0');
    if !plain {
        return Err(validation_error!("invalid artifact name: {name:?}"));
    }
    Ok(())
}

fn describe(name: &str, path: PathBuf) -> FwResult<RegisteredArtifact> {
    let size_bytes = fs::metadata(&path)?.len();
    Ok(RegisteredArtifact {
        name: name.to_string(),
        path,
        size_bytes,
        registered_at: Utc::now(),
    })
}

/// Move `from` to `to` without ever replacing an existing `to`.
///
/// Links the file into place and unlinks the source; where hard links are
/// unavailable (across file systems) it falls back to a no-clobber copy.
/// An occupied `to` is a [`FwError::Collision`] and leaves `from` in place.
fn move_file(name: &str, from: &Path, to: &Path) -> FwResult<()> {
    if !from.is_file() {
        return Err(StorageError::SaveFailed {
            name: name.to_string(),
            message: format!("{} is not a file", from.display()),
        }
        .into());
    }
    match fs::hard_link(from, to) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(FwError::Collision {
                name: name.to_string(),
            })
        }
        Err(_) => copy_atomic(from, to)?,
    }
    fs::remove_file(from)?;
    Ok(())
}

/// Copy through a temp file in the destination directory, then link it into place.
///
/// Readers never observe a half-written `to`, and an existing `to` is never
/// clobbered: that case is reported as a collision on `to`'s file name.
pub(crate) fn copy_atomic(from: &Path, to: &Path) -> FwResult<()> {
    let copy_failed = |message: String| StorageError::CopyFailed {
        from: from.display().to_string(),
        to: to.display().to_string(),
        message,
    };

    let dir = to
        .parent()
        .ok_or_else(|| copy_failed("destination has no parent directory".to_string()))?;
    let mut staged = tempfile::Builder::new()
        .prefix(".staging-")
        .tempfile_in(dir)
        .map_err(|e| StorageError::TempFile {
            dir: dir.display().to_string(),
            message: e.to_string(),
        })?;
    let mut input = fs::File::open(from).map_err(|e| copy_failed(e.to_string()))?;
    std::io::copy(&mut input, staged.as_file_mut()).map_err(|e| copy_failed(e.to_string()))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|e| copy_failed(e.to_string()))?;
    match staged.persist_noclobber(to) {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Err(FwError::Collision {
            name: to
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| to.display().to_string()),
        }),
        Err(e) => Err(copy_failed(e.error.to_string()).into()),
    }
}

fn remove_if_present(path: &Path) -> FwResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
