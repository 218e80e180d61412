//! Result types returned by the conversion service.
//!
//! Everything here is `Serialize` so a routing layer can hand it straight to
//! a JSON encoder, and the CLI can print it with `--json`.

use crate::error::PipelineError;
use crate::quota::StorageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one conversion request.
///
/// A request that reached the pipeline always yields a `ConversionOutput`,
/// even when a stage failed: check [`Self::success`] and [`Self::error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Whether a PDF was produced and kept.
    pub success: bool,
    /// Workspace holding the artifacts. Already destroyed when `success` is false.
    pub workspace_id: String,
    /// File name of the rendered PDF inside the workspace.
    pub pdf_file: Option<String>,
    /// Page images in page order (`page_001.jpg`, `page_002.jpg`, …).
    pub image_files: Vec<String>,
    /// Number of page images.
    pub total_pages: usize,
    /// Whether the hidden-slide rewrite ran and its copy was rendered.
    pub hidden_slides_unhidden: bool,
    /// The failing stage, if any. A rasterisation failure can be present on
    /// a successful result: the PDF survived but no images were produced.
    pub error: Option<PipelineError>,
    pub request_time: DateTime<Utc>,
    pub done_time: DateTime<Utc>,
    /// Seconds until the workspace is reclaimed, when a timer was armed.
    pub reclaim_after_secs: Option<u64>,
}

impl ConversionOutput {
    /// Treat any recorded stage error as a failure.
    ///
    /// Useful for callers that do not accept a PDF without page images.
    pub fn into_result(self) -> Result<Self, PipelineError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    /// Every artifact file name: the PDF first, then the page images.
    pub fn artifact_names(&self) -> Vec<&str> {
        self.pdf_file
            .iter()
            .map(String::as_str)
            .chain(self.image_files.iter().map(String::as_str))
            .collect()
    }
}

/// Result of a bulk or age-based sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Workspace ids that were destroyed.
    pub cleaned: Vec<String>,
    /// Workspace ids that could not be destroyed.
    pub failed: Vec<String>,
    /// Root size before the sweep minus root size after it.
    pub freed_bytes: u64,
}

impl SweepReport {
    pub fn freed_mb(&self) -> f64 {
        (self.freed_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// Liveness summary for probes and the startup banner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// True while storage still admits requests.
    pub healthy: bool,
    pub renderer_available: bool,
    pub storage: StorageStatus,
    pub timestamp: DateTime<Utc>,
}
