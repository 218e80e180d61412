//! Page rasterisation: turn the rendered PDF into one JPEG per page.
//!
//! pdfium is not async-safe and rendering is CPU-bound, so the work runs
//! inside `spawn_blocking` (see [`rasterize`]). The [`PageRasterizer`]
//! trait is the seam: [`PdfiumRasterizer`] is the production backend, and
//! tests plug in a fake that writes placeholder files.

use crate::error::PipelineError;
use image::codecs::jpeg::JpegEncoder;
use pdfium_render::prelude::*;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Points per inch in PDF user space.
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// Rasterisation parameters for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptions {
    pub dpi: u32,
    pub jpeg_quality: u8,
}

/// File name of the image for 1-based page `n`: `page_001.jpg`.
pub fn page_image_name(n: usize) -> String {
    format!("page_{:03}.jpg", n)
}

/// Backend that turns a PDF into page images.
///
/// Implementations write one image per page into `out_dir`, named with
/// [`page_image_name`], and return the names in page order. They are called
/// from a blocking thread and may block freely.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(
        &self,
        pdf: &Path,
        out_dir: &Path,
        options: &RasterOptions,
    ) -> Result<Vec<String>, PipelineError>;
}

/// Run `rasterizer` on a blocking thread.
pub async fn rasterize(
    rasterizer: Arc<dyn PageRasterizer>,
    pdf: &Path,
    out_dir: &Path,
    options: RasterOptions,
) -> Result<Vec<String>, PipelineError> {
    let pdf = pdf.to_path_buf();
    let out_dir = out_dir.to_path_buf();

    tokio::task::spawn_blocking(move || rasterizer.rasterize(&pdf, &out_dir, &options))
        .await
        .map_err(|e| PipelineError::RasterizeFailed {
            detail: format!("rasterise task panicked: {}", e),
        })?
}

/// pdfium-backed rasteriser.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    /// A pdfium shared library, or a directory containing one. None binds
    /// the system library.
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    fn bind(&self) -> Result<Pdfium, PipelineError> {
        let bindings = match &self.library_path {
            Some(path) if path.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
            }
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| PipelineError::RasterizeFailed {
            detail: format!("pdfium library unavailable: {:?}", e),
        })?;
        Ok(Pdfium::new(bindings))
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        pdf: &Path,
        out_dir: &Path,
        options: &RasterOptions,
    ) -> Result<Vec<String>, PipelineError> {
        let pdfium = self.bind()?;
        let document =
            pdfium
                .load_pdf_from_file(pdf, None)
                .map_err(|e| PipelineError::RasterizeFailed {
                    detail: format!("cannot open {}: {:?}", pdf.display(), e),
                })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        info!("Rasterising {} pages at {} DPI", total, options.dpi);

        let render_config =
            PdfRenderConfig::new().scale_page_by_factor(options.dpi as f32 / PDF_POINTS_PER_INCH);

        let mut names = Vec::with_capacity(total);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                PipelineError::RasterizeFailed {
                    detail: format!("page {}: {:?}", idx + 1, e),
                }
            })?;
            let image = bitmap.as_image().into_rgb8();

            let name = page_image_name(idx + 1);
            let target = out_dir.join(&name);
            let file = File::create(&target).map_err(|e| PipelineError::RasterizeFailed {
                detail: format!("cannot create {}: {}", target.display(), e),
            })?;
            let mut writer = BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut writer, options.jpeg_quality)
                .encode_image(&image)
                .map_err(|e| PipelineError::RasterizeFailed {
                    detail: format!("page {}: jpeg encode: {}", idx + 1, e),
                })?;

            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            names.push(name);
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_names_are_zero_padded() {
        assert_eq!(page_image_name(1), "page_001.jpg");
        assert_eq!(page_image_name(42), "page_042.jpg");
        assert_eq!(page_image_name(1000), "page_1000.jpg");
    }

    struct Panicky;

    impl PageRasterizer for Panicky {
        fn rasterize(&self, _: &Path, _: &Path, _: &RasterOptions) -> Result<Vec<String>, PipelineError> {
            panic!("backend blew up");
        }
    }

    #[tokio::test]
    async fn panicking_backend_becomes_rasterize_error() {
        let err = rasterize(
            Arc::new(Panicky),
            Path::new("x.pdf"),
            Path::new("."),
            RasterOptions {
                dpi: 200,
                jpeg_quality: 85,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.stage(), "rasterize");
    }

    #[test]
    fn missing_library_is_reported_not_panicked() {
        let r = PdfiumRasterizer::new(Some(PathBuf::from("/nonexistent/libpdfium.so")));
        let err = r
            .rasterize(
                Path::new("x.pdf"),
                Path::new("."),
                &RasterOptions {
                    dpi: 200,
                    jpeg_quality: 85,
                },
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::RasterizeFailed { .. }));
    }
}
