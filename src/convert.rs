//! The conversion service: the boundary a routing layer or the CLI calls.
//!
//! One [`ConversionService`] owns the workspace root for the life of the
//! process. It gates each request on storage, gives it a private workspace,
//! runs the pipeline, and then either arms delayed reclamation (success) or
//! destroys the workspace on the spot (failure).
//!
//! ```rust,no_run
//! use edgequake_pptx2pdf::{ConversionService, ConvertRequest, ServiceConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ConversionService::new(ServiceConfig::default())?;
//! service.startup().await?;
//!
//! let request = ConvertRequest::from_path("deck.pptx").await?;
//! let output = service.convert(request).await?;
//! for page in &output.image_files {
//!     println!("{}", page);
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::{ServiceConfig, MAX_DPI, MIN_DPI};
use crate::error::{PipelineError, ServiceError};
use crate::output::{ConversionOutput, HealthReport, SweepReport};
use crate::pipeline::rasterize::{PageRasterizer, PdfiumRasterizer, RasterOptions};
use crate::pipeline::render::{locate_renderer, RenderOptions};
use crate::pipeline::{self, PipelineJob};
use crate::quota::{QuotaGate, StorageStatus};
use crate::reclaim::ReclamationScheduler;
use crate::workspace::{Workspace, WorkspaceStatus, WorkspaceStore};
use chrono::Utc;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Leading bytes of every zip container, `.pptx` included.
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// One uploaded deck plus per-request options.
#[derive(Clone)]
pub struct ConvertRequest {
    /// Client-supplied file name. Only its extension is trusted.
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Force hidden slides visible before rendering. Default: true.
    pub include_hidden: bool,
    /// Rasterisation DPI; None uses the service default.
    pub dpi: Option<u32>,
    /// Override for how long outputs stay retrievable.
    pub reclaim_after: Option<Duration>,
}

impl fmt::Debug for ConvertRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertRequest")
            .field("file_name", &self.file_name)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("include_hidden", &self.include_hidden)
            .field("dpi", &self.dpi)
            .field("reclaim_after", &self.reclaim_after)
            .finish()
    }
}

impl ConvertRequest {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            include_hidden: true,
            dpi: None,
            reclaim_after: None,
        }
    }

    /// Read a deck from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ServiceError::Resource {
                path: path.to_path_buf(),
                source: e,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, bytes))
    }

    pub fn include_hidden(mut self, v: bool) -> Self {
        self.include_hidden = v;
        self
    }

    /// Set the DPI, clamped to the supported range.
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.dpi = Some(dpi.clamp(MIN_DPI, MAX_DPI));
        self
    }

    pub fn reclaim_after(mut self, delay: Duration) -> Self {
        self.reclaim_after = Some(delay);
        self
    }

    fn validate(&self, max_upload_bytes: u64) -> Result<(), ServiceError> {
        if self.bytes.is_empty() {
            return Err(ServiceError::InputInvalid("upload is empty".into()));
        }
        let is_pptx = Path::new(&self.file_name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pptx"));
        if !is_pptx {
            return Err(ServiceError::InputInvalid(format!(
                "'{}' is not a .pptx file",
                self.file_name
            )));
        }
        if self.bytes.len() as u64 > max_upload_bytes {
            return Err(ServiceError::InputInvalid(format!(
                "upload is {} bytes, limit is {}",
                self.bytes.len(),
                max_upload_bytes
            )));
        }
        if !self.bytes.starts_with(ZIP_MAGIC) {
            return Err(ServiceError::InputInvalid(format!(
                "'{}' is not a zip container",
                self.file_name
            )));
        }
        Ok(())
    }
}

/// Long-lived conversion service. Share it behind an `Arc`.
pub struct ConversionService {
    config: ServiceConfig,
    store: Arc<WorkspaceStore>,
    quota: Arc<QuotaGate>,
    scheduler: Arc<ReclamationScheduler>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionService")
            .field("config", &self.config)
            .field("root", &self.store.root())
            .field("pending_reclamations", &self.store.pending_count())
            .finish()
    }
}

impl ConversionService {
    /// Create the service and its workspace root.
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let store = Arc::new(WorkspaceStore::new(&config.workspace_root)?);
        let quota = Arc::new(QuotaGate::new(Arc::clone(&store), config.max_storage_bytes));
        let scheduler = Arc::new(ReclamationScheduler::new(Arc::clone(&store)));
        let rasterizer = config.rasterizer.clone().unwrap_or_else(|| {
            Arc::new(PdfiumRasterizer::new(config.pdfium_library_path.clone()))
                as Arc<dyn PageRasterizer>
        });

        Ok(Self {
            config,
            store,
            quota,
            scheduler,
            rasterizer,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<WorkspaceStore> {
        &self.store
    }

    /// Reclaim everything left by a previous process. Call before serving.
    pub async fn startup(&self) -> Result<SweepReport, ServiceError> {
        let report = self.sweep_all().await?;
        info!(
            "Startup sweep: {} workspaces removed, {:.2} MB freed, {} failed",
            report.cleaned.len(),
            report.freed_mb(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Cancel every pending reclamation. Workspaces stay on disk until the
    /// next startup sweep.
    pub fn shutdown(&self) -> usize {
        self.scheduler.cancel_all()
    }

    /// Convert one deck.
    ///
    /// # Errors
    /// `Err` only when the request never reached the pipeline: storage full
    /// ([`ServiceError::AdmissionRejected`]), a bad upload
    /// ([`ServiceError::InputInvalid`]), or the workspace could not be set
    /// up. Pipeline failures come back as `Ok` with `success == false`.
    pub async fn convert(&self, request: ConvertRequest) -> Result<ConversionOutput, ServiceError> {
        let request_time = Utc::now();
        info!("Starting conversion: {}", request.file_name);

        // ── Step 1: Admission ────────────────────────────────────────────
        let quota = Arc::clone(&self.quota);
        let admission = blocking(move || quota.admit()).await?;
        if !admission.allowed {
            warn!(
                "Rejected {}: storage at {} of {} bytes",
                request.file_name, admission.used_bytes, admission.max_bytes
            );
            return Err(ServiceError::AdmissionRejected {
                used_bytes: admission.used_bytes,
                max_bytes: admission.max_bytes,
            });
        }

        // ── Step 2: Validate upload ──────────────────────────────────────
        request.validate(self.config.max_upload_bytes)?;

        // ── Step 3: Allocate workspace and save input ────────────────────
        let workspace = self.store.create_workspace()?;
        let input_path = workspace
            .path
            .join(format!("input_{}.pptx", request_time.timestamp_millis()));
        if let Err(e) = tokio::fs::write(&input_path, &request.bytes).await {
            self.discard(&workspace).await;
            return Err(ServiceError::Resource {
                path: input_path,
                source: e,
            });
        }
        debug!(
            "Saved {} bytes to {}",
            request.bytes.len(),
            input_path.display()
        );

        // ── Step 4: Run pipeline ─────────────────────────────────────────
        let job = PipelineJob {
            input: &input_path,
            workspace: &workspace.path,
            include_hidden: request.include_hidden,
            render: RenderOptions::from_config(&self.config),
            raster: RasterOptions {
                dpi: request.dpi.unwrap_or(self.config.default_dpi),
                jpeg_quality: self.config.jpeg_quality,
            },
            rasterizer: Arc::clone(&self.rasterizer),
        };
        let result = pipeline::run(job).await;

        // ── Step 5: Keep or discard ──────────────────────────────────────
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return Ok(self.fail(workspace, e, request_time).await),
        };
        if let Some(e) = &outcome.raster_error {
            if self.config.fail_on_rasterize_error {
                return Ok(self.fail(workspace, e.clone(), request_time).await);
            }
        }

        let delay = request.reclaim_after.unwrap_or(self.config.reclaim_delay);
        self.scheduler.arm(&workspace, delay);

        let total_pages = outcome.image_files.len();
        info!(
            "Converted {} → {} ({} pages) in {}",
            request.file_name, outcome.pdf_file, total_pages, workspace.id
        );

        Ok(ConversionOutput {
            success: true,
            workspace_id: workspace.id,
            pdf_file: Some(outcome.pdf_file),
            image_files: outcome.image_files,
            total_pages,
            hidden_slides_unhidden: outcome.hidden_slides_unhidden,
            error: outcome.raster_error,
            request_time,
            done_time: Utc::now(),
            reclaim_after_secs: Some(delay.as_secs()),
        })
    }

    /// Inspect a live workspace.
    pub async fn workspace_status(&self, id: &str) -> Result<WorkspaceStatus, ServiceError> {
        let store = Arc::clone(&self.store);
        let key = id.to_string();
        blocking(move || store.status(&key))
            .await?
            .ok_or_else(|| ServiceError::WorkspaceNotFound { id: id.to_string() })
    }

    /// Cancel every timer and destroy every workspace now.
    pub async fn sweep_all(&self) -> Result<SweepReport, ServiceError> {
        let scheduler = Arc::clone(&self.scheduler);
        blocking(move || scheduler.sweep_all()).await
    }

    /// Destroy every workspace created more than `hours` ago.
    pub async fn sweep_older_than(&self, hours: u64) -> Result<SweepReport, ServiceError> {
        self.sweep_older_than_duration(Duration::from_secs(hours.saturating_mul(3600)))
            .await
    }

    /// [`Self::sweep_older_than`] with the configured stale age.
    pub async fn sweep_stale(&self) -> Result<SweepReport, ServiceError> {
        self.sweep_older_than_duration(self.config.stale_age).await
    }

    async fn sweep_older_than_duration(&self, max_age: Duration) -> Result<SweepReport, ServiceError> {
        let scheduler = Arc::clone(&self.scheduler);
        let report = blocking(move || scheduler.sweep_older_than(max_age)).await?;
        info!(
            "Age sweep (> {}s): {} removed, {:.2} MB freed",
            max_age.as_secs(),
            report.cleaned.len(),
            report.freed_mb()
        );
        Ok(report)
    }

    /// Current storage usage.
    pub async fn storage_status(&self) -> Result<StorageStatus, ServiceError> {
        let quota = Arc::clone(&self.quota);
        blocking(move || quota.status()).await
    }

    /// Liveness summary: storage admits requests and the renderer is installed.
    pub async fn health(&self) -> Result<HealthReport, ServiceError> {
        let storage = self.storage_status().await?;
        let renderer_available = locate_renderer(&self.config.renderer_path).is_some();
        Ok(HealthReport {
            healthy: !storage.critical,
            renderer_available,
            storage,
            timestamp: Utc::now(),
        })
    }

    /// Path of a downloadable artifact, if it exists.
    pub fn resolve_artifact(&self, workspace_id: &str, file_name: &str) -> Option<PathBuf> {
        self.store.resolve_artifact(workspace_id, file_name)
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    async fn fail(
        &self,
        workspace: Workspace,
        error: PipelineError,
        request_time: chrono::DateTime<Utc>,
    ) -> ConversionOutput {
        warn!(
            "Conversion in {} failed at {} stage: {}",
            workspace.id,
            error.stage(),
            error
        );
        self.discard(&workspace).await;
        ConversionOutput {
            success: false,
            workspace_id: workspace.id,
            pdf_file: None,
            image_files: Vec::new(),
            total_pages: 0,
            hidden_slides_unhidden: false,
            error: Some(error),
            request_time,
            done_time: Utc::now(),
            reclaim_after_secs: None,
        }
    }

    async fn discard(&self, workspace: &Workspace) {
        let store = Arc::clone(&self.store);
        let path = workspace.path.clone();
        if let Err(e) = blocking(move || store.destroy_workspace(&path)).await {
            warn!("Could not discard {}: {}", workspace.id, e);
        }
    }
}

/// Run a filesystem-heavy closure off the async worker threads.
async fn blocking<F, T>(f: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::Internal(format!("Blocking task panicked: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pptx_bytes() -> Vec<u8> {
        let mut b = ZIP_MAGIC.to_vec();
        b.extend_from_slice(b"rest of archive");
        b
    }

    #[test]
    fn request_defaults() {
        let r = ConvertRequest::new("deck.pptx", pptx_bytes());
        assert!(r.include_hidden);
        assert!(r.dpi.is_none());
        assert!(r.validate(1024).is_ok());
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(ConvertRequest::new("DECK.PPTX", pptx_bytes()).validate(1024).is_ok());
        let err = ConvertRequest::new("deck.ppt", pptx_bytes())
            .validate(1024)
            .unwrap_err();
        assert!(err.to_string().contains("not a .pptx"), "got: {err}");
    }

    #[test]
    fn empty_upload_rejected() {
        let err = ConvertRequest::new("deck.pptx", Vec::new())
            .validate(1024)
            .unwrap_err();
        assert!(matches!(err, ServiceError::InputInvalid(_)));
    }

    #[test]
    fn oversize_upload_rejected() {
        let err = ConvertRequest::new("deck.pptx", pptx_bytes())
            .validate(4)
            .unwrap_err();
        assert!(err.to_string().contains("limit"), "got: {err}");
    }

    #[test]
    fn non_zip_rejected() {
        let err = ConvertRequest::new("deck.pptx", b"%PDF-1.7".to_vec())
            .validate(1024)
            .unwrap_err();
        assert!(err.to_string().contains("zip"), "got: {err}");
    }

    #[test]
    fn dpi_is_clamped() {
        assert_eq!(ConvertRequest::new("a.pptx", vec![]).dpi(10).dpi, Some(MIN_DPI));
        assert_eq!(ConvertRequest::new("a.pptx", vec![]).dpi(9000).dpi, Some(MAX_DPI));
    }

    #[test]
    fn debug_elides_payload() {
        let s = format!("{:?}", ConvertRequest::new("a.pptx", vec![0; 2048]));
        assert!(s.contains("<2048 bytes>"), "got: {s}");
    }
}
