//! Pipeline stages for slide-deck conversion.
//!
//! Each submodule implements exactly one transformation step; [`run`] chains
//! them for one request inside its workspace.
//!
//! ## Data Flow
//!
//! ```text
//! input.pptx ──▶ unhide ──▶ render ──▶ rasterize
//!               (zip+xml)  (office)   (pdfium)
//! ```
//!
//! 1. [`unhide`]: best-effort copy of the deck with hidden slides forced
//!    visible; skipped on request or on failure
//! 2. [`render`]: office renderer subprocess under a wall-clock budget
//! 3. [`rasterize`]: one JPEG per PDF page; runs in `spawn_blocking`
//!
//! Render-stage failures are returned as `Err`. A rasterisation failure is
//! carried in [`PipelineOutcome::raster_error`] because the PDF already
//! exists by then and the caller decides whether to keep it.

pub mod rasterize;
pub mod render;
pub mod unhide;

use crate::error::PipelineError;
use once_cell::sync::Lazy;
use rasterize::{PageRasterizer, RasterOptions};
use regex::Regex;
use render::RenderOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

static RE_PAGE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^page_\d{3,}\.jpg$").unwrap());

/// Everything [`run`] needs for one request.
pub struct PipelineJob<'a> {
    /// The uploaded deck, already saved inside `workspace`.
    pub input: &'a Path,
    /// Output directory for the PDF and page images.
    pub workspace: &'a Path,
    pub include_hidden: bool,
    pub render: RenderOptions,
    pub raster: RasterOptions,
    pub rasterizer: Arc<dyn PageRasterizer>,
}

/// Artifacts left in the workspace after a render succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    /// File name of the PDF inside the workspace.
    pub pdf_file: String,
    /// Page images in page order; empty when rasterisation failed.
    pub image_files: Vec<String>,
    /// The unhidden copy was produced and rendered.
    pub hidden_slides_unhidden: bool,
    pub raster_error: Option<PipelineError>,
}

/// Run unhide → render → rasterize for one request.
pub async fn run(job: PipelineJob<'_>) -> Result<PipelineOutcome, PipelineError> {
    // ── Step 1: Unhide ───────────────────────────────────────────────────
    let unhidden = if job.include_hidden {
        let input = job.input.to_path_buf();
        match tokio::task::spawn_blocking(move || unhide::unhide_slides(&input)).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Unhide task panicked: {}; rendering original", e);
                None
            }
        }
    } else {
        None
    };
    let render_input = unhidden.as_deref().unwrap_or(job.input);

    // ── Step 2: Render ───────────────────────────────────────────────────
    let rendered = render::render_to_pdf(render_input, job.workspace, &job.render).await?;

    // ── Step 3: Restore the caller-facing file name ──────────────────────
    let pdf_path = match &unhidden {
        Some(copy) => adopt_unhidden_output(rendered, job.input, copy),
        None => rendered,
    };
    let pdf_file = file_name_of(&pdf_path);
    info!("PDF ready: {}", pdf_path.display());

    // ── Step 4: Rasterise ────────────────────────────────────────────────
    let (image_files, raster_error) = match rasterize::rasterize(
        Arc::clone(&job.rasterizer),
        &pdf_path,
        job.workspace,
        job.raster,
    )
    .await
    {
        Ok(names) => {
            info!("Rasterised {} pages", names.len());
            (names, None)
        }
        Err(e) => {
            warn!("Rasterisation failed for {}: {}", pdf_path.display(), e);
            remove_page_images(job.workspace);
            (Vec::new(), Some(e))
        }
    };

    Ok(PipelineOutcome {
        pdf_file,
        image_files,
        hidden_slides_unhidden: unhidden.is_some(),
        raster_error,
    })
}

/// Rename `<stem>_unhidden.pdf` to the original input's stem and drop the
/// unhidden deck. Keeps the rendered name if the rename fails.
fn adopt_unhidden_output(rendered: PathBuf, input: &Path, unhidden_copy: &Path) -> PathBuf {
    if let Err(e) = std::fs::remove_file(unhidden_copy) {
        debug!("Could not remove {}: {}", unhidden_copy.display(), e);
    }

    let Some(stem) = input.file_stem() else {
        return rendered;
    };
    let target = rendered.with_file_name(format!("{}.pdf", stem.to_string_lossy()));
    if target == rendered {
        return rendered;
    }
    match std::fs::rename(&rendered, &target) {
        Ok(()) => target,
        Err(e) => {
            warn!(
                "Could not rename {} to {}: {}",
                rendered.display(),
                target.display(),
                e
            );
            rendered
        }
    }
}

/// Delete partially written page images after a failed rasterisation.
fn remove_page_images(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        if RE_PAGE_IMAGE.is_match(&entry.file_name().to_string_lossy()) {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
