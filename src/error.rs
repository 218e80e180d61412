//! Error types for the edgequake-pptx2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ServiceError`]: **Fatal for the call.** The request never reached the
//!   pipeline (storage full, bad upload) or a workspace could not be created
//!   or found. Returned as `Err(ServiceError)` from the service methods.
//!
//! * [`PipelineError`]: **Terminal for one conversion.** A pipeline stage
//!   failed after the workspace was allocated. Stored inside
//!   [`crate::output::ConversionOutput`] so the caller receives a structured
//!   result, and the process keeps serving other requests.
//!
//! Neither type is ever retried automatically. The caller re-submits.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`crate::convert::ConversionService`] methods.
///
/// Pipeline failures use [`PipelineError`] and are reported inside
/// [`crate::output::ConversionOutput`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ServiceError {
    // ── Admission ─────────────────────────────────────────────────────────
    /// Aggregate workspace usage is at or above the configured maximum.
    #[error(
        "Storage quota exhausted: {used_bytes} of {max_bytes} bytes in use\n\
Wait for pending workspaces to be reclaimed or run a sweep."
    )]
    AdmissionRejected { used_bytes: u64, max_bytes: u64 },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The upload is empty, too large, or not a `.pptx` container.
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    // ── Workspace errors ──────────────────────────────────────────────────
    /// A filesystem operation on a workspace failed.
    #[error("Filesystem error on '{path}': {source}")]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No live workspace carries this identifier.
    #[error("Workspace '{id}' does not exist or has already been reclaimed")]
    WorkspaceNotFound { id: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (e.g. a blocking task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A terminal failure of one conversion pipeline stage.
///
/// Render-stage failures discard the workspace immediately. A rasterisation
/// failure keeps the rendered PDF (see [`crate::config::ServiceConfig::fail_on_rasterize_error`]).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// The office renderer executable could not be located.
    #[error("Renderer not found: '{path}'\nInstall LibreOffice or set LIBREOFFICE_PATH.")]
    RendererUnavailable { path: String },

    /// The renderer could not be started or exited with a failure status.
    #[error("PDF rendering failed: {detail}")]
    RenderFailed { detail: String },

    /// The renderer did not finish within the wall-clock budget.
    #[error("PDF rendering timed out after {secs}s\nIncrease CONVERSION_TIMEOUT_SECONDS.")]
    RenderTimeout { secs: u64 },

    /// The renderer exited 0 but no PDF appeared in the output directory.
    #[error("Renderer exited successfully but produced no PDF in '{dir}'")]
    NoOutputProduced { dir: PathBuf },

    /// Rasterising the rendered PDF into page images failed.
    #[error("Page rasterisation failed: {detail}")]
    RasterizeFailed { detail: String },
}

impl PipelineError {
    /// Short name of the stage that failed, for logs and API payloads.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::RendererUnavailable { .. }
            | PipelineError::RenderFailed { .. }
            | PipelineError::RenderTimeout { .. }
            | PipelineError::NoOutputProduced { .. } => "render",
            PipelineError::RasterizeFailed { .. } => "rasterize",
        }
    }
}
