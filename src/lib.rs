//! # edgequake-pptx2pdf
//!
//! Convert PowerPoint decks to PDF and per-page JPEG images, with bounded
//! disk usage.
//!
//! ## What this crate manages
//!
//! The heavy lifting is delegated: LibreOffice renders the deck, pdfium
//! rasterises the PDF. This crate owns everything around those tools:
//!
//! * a **quota gate** that refuses work once the workspace root reaches its
//!   storage limit,
//! * one **workspace** directory per request, so concurrent conversions never
//!   see each other's files,
//! * a **pipeline** with a hard wall-clock budget on the renderer,
//! * an **OOXML rewrite** that forces hidden slides visible before rendering,
//! * **reclamation**: a cancellable timer per workspace plus eager bulk and
//!   age-based sweeps.
//!
//! ## Pipeline Overview
//!
//! ```text
//! .pptx upload
//!  │
//!  ├─ 1. Admit    total bytes under root < quota
//!  ├─ 2. Allocate temp_<millis>/input_<millis>.pptx
//!  ├─ 3. Unhide   force show="1" on every slide (best effort)
//!  ├─ 4. Render   libreoffice --headless --convert-to pdf (timeout)
//!  ├─ 5. Raster   page_001.jpg, page_002.jpg, … (spawn_blocking)
//!  └─ 6. Retain   reclaim after 20 min, or immediately on failure
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pptx2pdf::{ConversionService, ConvertRequest, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ConversionService::new(ServiceConfig::default())?;
//!     service.startup().await?;
//!
//!     let output = service
//!         .convert(ConvertRequest::from_path("deck.pptx").await?)
//!         .await?;
//!     println!("{:?} + {} pages", output.pdf_file, output.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pptx2pdf` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-pptx2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod quota;
pub mod reclaim;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use convert::{ConversionService, ConvertRequest};
pub use error::{PipelineError, ServiceError};
pub use output::{ConversionOutput, HealthReport, SweepReport};
pub use pipeline::rasterize::{PageRasterizer, PdfiumRasterizer, RasterOptions};
pub use quota::{Admission, QuotaGate, StorageStatus};
pub use reclaim::ReclamationScheduler;
pub use workspace::{Workspace, WorkspaceStatus, WorkspaceStore};
