//! Workspace store: one directory per conversion request.
//!
//! The store is the single source of truth for which workspaces exist (a
//! directory listing of the root, nothing else is persisted) and which of
//! them have a pending reclamation. It is shared as `Arc<WorkspaceStore>`
//! between request handlers and reclamation timers.
//!
//! ## Racing with deletion
//!
//! Reclamation timers delete workspaces while requests measure the root for
//! admission control. Every walk here therefore skips entries that vanish
//! between listing and stat instead of failing: a benign race with another
//! deletion must never turn into an error for the caller.

use crate::error::ServiceError;
use crate::output::SweepReport;
use crate::reclaim::ReclamationTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Prefix of every workspace directory name.
pub const WORKSPACE_PREFIX: &str = "temp_";

/// A freshly allocated workspace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Directory name under the root, e.g. `temp_1718000000000`.
    pub id: String,
    /// Full path of the directory.
    pub path: PathBuf,
    /// When the directory was created.
    pub created_at: DateTime<Utc>,
}

/// What a caller can learn about a live workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceStatus {
    pub exists: bool,
    pub workspace_id: String,
    /// PDF files, sorted by name.
    pub pdf_files: Vec<String>,
    /// Page images (`.jpg`, `.jpeg`, `.png`), sorted by name.
    pub image_files: Vec<String>,
    pub total_files: usize,
    pub size_bytes: u64,
    pub has_pending_reclamation: bool,
    /// Seconds until the pending reclamation fires, if one is armed.
    pub reclaim_in_secs: Option<u64>,
}

/// Creates, measures and destroys workspace directories under one root.
pub struct WorkspaceStore {
    root: PathBuf,
    pending: Mutex<HashMap<PathBuf, ReclamationTask>>,
}

impl WorkspaceStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| ServiceError::Resource {
            path: root.clone(),
            source: e,
        })?;
        debug!("Workspace root ready: {}", root.display());
        Ok(Self {
            root,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// The directory that holds every workspace.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Allocate a new workspace named after the current time in milliseconds.
    ///
    /// `create_dir` (not `create_dir_all`) makes the name claim atomic: when
    /// two requests land in the same millisecond the loser retries with a
    /// numeric suffix.
    pub fn create_workspace(&self) -> Result<Workspace, ServiceError> {
        fs::create_dir_all(&self.root).map_err(|e| ServiceError::Resource {
            path: self.root.clone(),
            source: e,
        })?;

        let created_at = Utc::now();
        let base = format!("{WORKSPACE_PREFIX}{}", created_at.timestamp_millis());
        let mut id = base.clone();
        let mut suffix = 1u32;

        loop {
            let path = self.root.join(&id);
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!("Created workspace {}", path.display());
                    return Ok(Workspace {
                        id,
                        path,
                        created_at,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    id = format!("{base}_{suffix}");
                    suffix += 1;
                }
                Err(e) => return Err(ServiceError::Resource { path, source: e }),
            }
        }
    }

    /// Recursively delete a workspace and drop any pending reclamation for it.
    ///
    /// Returns `true` when a directory was removed. A path that no longer
    /// exists returns `false` without error, so calling this twice is safe.
    pub fn destroy_workspace(&self, path: &Path) -> bool {
        self.cancel_reclamation(path);

        match fs::remove_dir_all(path) {
            Ok(()) => {
                info!("Reclaimed workspace {}", path.display());
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Workspace already gone: {}", path.display());
                false
            }
            Err(e) => {
                warn!("Failed to reclaim workspace {}: {}", path.display(), e);
                false
            }
        }
    }

    // ── Measurement ───────────────────────────────────────────────────────

    /// Total bytes under the workspace root.
    pub fn total_size(&self) -> u64 {
        directory_size(&self.root)
    }

    /// First-level workspace directories as `(id, path)`, sorted by id.
    pub fn list_workspaces(&self) -> Vec<(String, PathBuf)> {
        self.list_entries(|t| t.is_dir())
    }

    /// First-level entries of the root of any type, sorted by name.
    fn list_entries(&self, keep: impl Fn(fs::FileType) -> bool) -> Vec<(String, PathBuf)> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {}: {}", self.root.display(), e);
                return Vec::new();
            }
        };

        let mut found: Vec<(String, PathBuf)> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(&keep).unwrap_or(false))
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .collect();
        found.sort();
        found
    }

    // ── Sweeps ────────────────────────────────────────────────────────────

    /// Cancel every pending reclamation and remove every first-level entry
    /// of the root: workspaces, stray files and symlinks alike.
    ///
    /// `freed_bytes` is the root size before minus after, so bytes removed by
    /// a concurrent timer during the sweep are counted too. An entry a timer
    /// deleted first is reported as cleaned.
    pub fn sweep_all(&self) -> SweepReport {
        let cancelled = self.cancel_all_reclamations();
        let before = self.total_size();

        let mut report = SweepReport::default();
        for (name, path) in self.list_entries(|_| true) {
            match self.remove_entry(&path) {
                Ok(()) => report.cleaned.push(name),
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    report.failed.push(name);
                }
            }
        }

        report.freed_bytes = before.saturating_sub(self.total_size());
        info!(
            "Swept all workspaces: {} cleaned, {} failed, {} timers cancelled, {} bytes freed",
            report.cleaned.len(),
            report.failed.len(),
            cancelled,
            report.freed_bytes
        );
        report
    }

    /// Delete one first-level entry. Directories go recursively, anything
    /// else (file, symlink, socket) is unlinked. Already gone is success.
    fn remove_entry(&self, path: &Path) -> std::io::Result<()> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let removed = if meta.is_dir() {
            self.cancel_reclamation(path);
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match removed {
            Ok(()) => {
                info!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Already gone: {}", path.display());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Destroy every workspace created strictly before `now - max_age`.
    pub fn sweep_older_than(&self, max_age: Duration) -> SweepReport {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let before = self.total_size();

        let mut report = SweepReport::default();
        for (id, path) in self.list_workspaces() {
            let Some(created) = creation_time(&path) else {
                continue;
            };
            if created >= cutoff {
                continue;
            }
            if self.destroy_workspace(&path) {
                report.cleaned.push(id);
            } else {
                report.failed.push(id);
            }
        }

        report.freed_bytes = before.saturating_sub(self.total_size());
        info!(
            "Swept workspaces older than {}s: {} cleaned",
            max_age.as_secs(),
            report.cleaned.len()
        );
        report
    }

    // ── Lookup ────────────────────────────────────────────────────────────

    /// Resolve a workspace id to its directory path.
    ///
    /// Returns None for ids that could escape the root.
    pub fn workspace_path(&self, id: &str) -> Option<PathBuf> {
        is_plain_name(id).then(|| self.root.join(id))
    }

    /// Resolve a downloadable artifact inside a live workspace.
    pub fn resolve_artifact(&self, id: &str, file_name: &str) -> Option<PathBuf> {
        if !is_plain_name(file_name) {
            return None;
        }
        let path = self.workspace_path(id)?.join(file_name);
        path.is_file().then_some(path)
    }

    /// Describe a live workspace, or None when it does not exist.
    pub fn status(&self, id: &str) -> Option<WorkspaceStatus> {
        let path = self.workspace_path(id)?;
        let entries = fs::read_dir(&path).ok()?;

        let mut files: Vec<String> = entries
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();

        let pdf_files = files
            .iter()
            .filter(|f| has_extension(f, &["pdf"]))
            .cloned()
            .collect();
        let image_files = files
            .iter()
            .filter(|f| has_extension(f, &["jpg", "jpeg", "png"]))
            .cloned()
            .collect();

        let reclaim_in_secs = self
            .lock_pending()
            .get(&path)
            .map(|task| task.remaining().as_secs());

        Some(WorkspaceStatus {
            exists: true,
            workspace_id: id.to_string(),
            pdf_files,
            image_files,
            total_files: files.len(),
            size_bytes: directory_size(&path),
            has_pending_reclamation: reclaim_in_secs.is_some(),
            reclaim_in_secs,
        })
    }

    // ── Pending reclamations ──────────────────────────────────────────────
    //
    // Every mutation of the map goes through these methods and holds the
    // mutex for its whole read-modify-write.

    /// Install a reclamation for `path`, cancelling any previous one.
    ///
    /// `make` runs under the lock, so a timer spawned inside it cannot fire
    /// (and look itself up) before it is registered.
    pub(crate) fn install_reclamation<F>(&self, path: &Path, make: F)
    where
        F: FnOnce() -> ReclamationTask,
    {
        let mut pending = self.lock_pending();
        let task = make();
        if let Some(previous) = pending.insert(path.to_path_buf(), task) {
            debug!("Replaced pending reclamation for {}", path.display());
            previous.cancel();
        }
    }

    /// Called by a firing timer: remove its own entry if it is still current.
    ///
    /// Returns false when the entry was cancelled or replaced meanwhile, in
    /// which case the timer must not delete anything.
    pub(crate) fn complete_reclamation(&self, path: &Path, generation: u64) -> bool {
        let mut pending = self.lock_pending();
        match pending.get(path) {
            Some(task) if task.generation == generation => {
                pending.remove(path);
                true
            }
            _ => false,
        }
    }

    /// Cancel the pending reclamation for `path`. Returns whether one existed.
    pub fn cancel_reclamation(&self, path: &Path) -> bool {
        match self.lock_pending().remove(path) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending reclamation. Returns how many were cancelled.
    pub fn cancel_all_reclamations(&self) -> usize {
        let drained: Vec<ReclamationTask> = self.lock_pending().drain().map(|(_, t)| t).collect();
        let count = drained.len();
        for task in drained {
            task.cancel();
        }
        count
    }

    /// Whether a reclamation is armed for `path`.
    pub fn has_pending_reclamation(&self, path: &Path) -> bool {
        self.lock_pending().contains_key(path)
    }

    /// Number of armed reclamations.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<PathBuf, ReclamationTask>> {
        // A panic while holding the lock cannot leave the map half-updated
        // (every operation is a single insert/remove), so keep using it.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sum the sizes of all regular files below `path`.
///
/// Symlinks are not followed. Entries that disappear mid-walk are skipped.
pub fn directory_size(path: &Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else if meta.is_file() {
                total += meta.len();
            }
        }
    }

    total
}

/// Birth time of a directory, or its modification time when the filesystem
/// does not record one.
fn creation_time(path: &Path) -> Option<SystemTime> {
    let meta = fs::symlink_metadata(path).ok()?;
    meta.created().or_else(|_| meta.modified()).ok()
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(&['/', '\\'][..])
        && !name.contains('\0')
}

fn has_extension(name: &str, extensions: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}
