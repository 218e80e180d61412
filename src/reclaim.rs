//! Delayed, cancellable reclamation of workspaces.
//!
//! Each successful conversion arms one timer that deletes its workspace once
//! the retrieval window closes. Timers are tokio tasks; their handles live in
//! the [`WorkspaceStore`]'s pending map so that destroying a workspace by any
//! route also cancels its timer.
//!
//! ## Ordering within one workspace
//!
//! Every armed task carries a generation number. When it wakes up it asks the
//! store to remove *its own* entry; if the entry was cancelled or replaced by
//! a later `arm`, the task exits without touching the filesystem. Together
//! with the abort handle this gives: no double fire, no fire after cancel,
//! and re-arming resets the clock instead of stacking timers.
//!
//! Timers are not persisted. A restarted process starts with an empty map and
//! runs [`crate::convert::ConversionService::startup`], which sweeps every
//! workspace left behind.

use crate::output::SweepReport;
use crate::workspace::{Workspace, WorkspaceStore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One scheduled deletion. Owned by the store's pending map, never cloned.
#[derive(Debug)]
pub(crate) struct ReclamationTask {
    pub(crate) workspace_id: String,
    pub(crate) fire_at: Instant,
    pub(crate) generation: u64,
    handle: AbortHandle,
}

impl ReclamationTask {
    /// Stop the timer. Safe on a timer that already fired.
    pub(crate) fn cancel(self) {
        debug!(
            "Cancelled reclamation #{} for {}",
            self.generation, self.workspace_id
        );
        self.handle.abort();
    }

    /// Time left before the timer fires.
    pub(crate) fn remaining(&self) -> Duration {
        self.fire_at.saturating_duration_since(Instant::now())
    }
}

/// Longest delay honoured; larger requests are clamped so the deadline
/// cannot overflow `Instant`.
const MAX_DELAY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Arms and cancels reclamation timers against a shared [`WorkspaceStore`].
///
/// [`Self::arm`] spawns onto the current tokio runtime and must be called
/// from within one.
pub struct ReclamationScheduler {
    store: Arc<WorkspaceStore>,
    next_generation: AtomicU64,
}

impl ReclamationScheduler {
    pub fn new(store: Arc<WorkspaceStore>) -> Self {
        Self {
            store,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Schedule destruction of `workspace` after `delay`.
    ///
    /// Any timer already armed for the workspace is cancelled first.
    pub fn arm(&self, workspace: &Workspace, delay: Duration) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let delay = delay.min(MAX_DELAY);
        let fire_at = Instant::now() + delay;
        let path = workspace.path.clone();
        let workspace_id = workspace.id.clone();

        self.store.install_reclamation(&path, || {
            let store = Arc::clone(&self.store);
            let timer_path = path.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep_until(fire_at).await;
                fire(store, timer_path, generation).await;
            });

            ReclamationTask {
                workspace_id,
                fire_at,
                generation,
                handle: handle.abort_handle(),
            }
        });

        info!(
            "Reclamation of {} scheduled in {}s",
            workspace.id,
            delay.as_secs()
        );
    }

    /// Cancel the timer for one workspace without deleting it.
    pub fn cancel(&self, workspace: &Workspace) -> bool {
        self.store.cancel_reclamation(&workspace.path)
    }

    /// Cancel every armed timer. Used at startup and shutdown.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.store.cancel_all_reclamations();
        if cancelled > 0 {
            info!("Cancelled {} pending reclamations", cancelled);
        }
        cancelled
    }

    /// Cancel every timer and destroy every workspace now.
    pub fn sweep_all(&self) -> SweepReport {
        self.cancel_all();
        self.store.sweep_all()
    }

    /// Destroy every workspace older than `max_age` now.
    pub fn sweep_older_than(&self, max_age: Duration) -> SweepReport {
        self.store.sweep_older_than(max_age)
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.store.pending_count()
    }
}

/// Timer body: claim the entry, then delete off the async worker threads.
async fn fire(store: Arc<WorkspaceStore>, path: PathBuf, generation: u64) {
    if !store.complete_reclamation(&path, generation) {
        debug!(
            "Reclamation #{} for {} superseded, skipping",
            generation,
            path.display()
        );
        return;
    }

    let shown = path.display().to_string();
    match tokio::task::spawn_blocking(move || store.destroy_workspace(&path)).await {
        Ok(true) => debug!("Reclamation #{} removed {}", generation, shown),
        Ok(false) => debug!("Reclamation #{}: {} was already gone", generation, shown),
        Err(e) => warn!("Reclamation task for {} panicked: {}", shown, e),
    }
}
