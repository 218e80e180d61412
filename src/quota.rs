//! Admission control against the global storage quota.
//!
//! The gate keeps no state: every call re-measures the workspace root. The
//! check and the workspace creation that follows are not atomic, so
//! concurrent requests admitted just under the limit can each add one
//! upload's worth of data before the next check rejects.

use crate::workspace::WorkspaceStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Usage ratio at which [`StorageStatus::warning`] turns on.
pub const WARNING_RATIO: f64 = 0.8;

/// Decision for one incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub allowed: bool,
    pub used_bytes: u64,
    pub max_bytes: u64,
}

impl Admission {
    /// Admit iff usage is strictly below the maximum. A root exactly at the
    /// limit is full.
    pub fn evaluate(used_bytes: u64, max_bytes: u64) -> Self {
        Self {
            allowed: used_bytes < max_bytes,
            used_bytes,
            max_bytes,
        }
    }

    /// `used / max`; 1.0 when the maximum is zero.
    pub fn usage_ratio(&self) -> f64 {
        if self.max_bytes == 0 {
            1.0
        } else {
            self.used_bytes as f64 / self.max_bytes as f64
        }
    }
}

/// Storage usage snapshot for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatus {
    pub used_bytes: u64,
    pub max_bytes: u64,
    pub usage_ratio: f64,
    /// Usage in percent, rounded to one decimal.
    pub usage_percent: f64,
    /// Usage is at or above [`WARNING_RATIO`].
    pub warning: bool,
    /// New requests are being rejected.
    pub critical: bool,
    pub pending_reclamations: usize,
}

impl StorageStatus {
    pub fn from_admission(admission: Admission, pending_reclamations: usize) -> Self {
        let ratio = admission.usage_ratio();
        Self {
            used_bytes: admission.used_bytes,
            max_bytes: admission.max_bytes,
            usage_ratio: ratio,
            usage_percent: (ratio * 1000.0).round() / 10.0,
            warning: ratio >= WARNING_RATIO,
            critical: !admission.allowed,
            pending_reclamations,
        }
    }
}

/// Computes admission decisions from a shared [`WorkspaceStore`].
pub struct QuotaGate {
    store: Arc<WorkspaceStore>,
    max_bytes: u64,
}

impl QuotaGate {
    pub fn new(store: Arc<WorkspaceStore>, max_bytes: u64) -> Self {
        Self { store, max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Measure the root and decide. Blocks for the duration of the walk.
    pub fn admit(&self) -> Admission {
        Admission::evaluate(self.store.total_size(), self.max_bytes)
    }

    /// Measure the root and describe usage.
    pub fn status(&self) -> StorageStatus {
        StorageStatus::from_admission(self.admit(), self.store.pending_count())
    }
}
