//! Configuration for the conversion service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. Every knob has a documented default so a
//! caller only sets what differs from a stock deployment.
//!
//! The binary maps environment variables onto the builder (see
//! `src/bin/pptx2pdf.rs`); the library itself never reads the environment.

use crate::error::ServiceError;
use crate::pipeline::rasterize::PageRasterizer;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One gibibyte, the unit the storage quota is usually expressed in.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Lowest accepted rasterisation DPI.
pub const MIN_DPI: u32 = 72;

/// Highest accepted rasterisation DPI.
pub const MAX_DPI: u32 = 600;

/// Configuration for a [`crate::convert::ConversionService`].
///
/// # Example
/// ```rust
/// use edgequake_pptx2pdf::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .workspace_root("/var/lib/pptx2pdf")
///     .max_storage_gb(2.0)
///     .reclaim_delay(Duration::from_secs(600))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Directory under which one sub-directory per workspace is created. Default: `temp`.
    pub workspace_root: PathBuf,

    /// Aggregate workspace size at which new requests are rejected. Default: 10 GiB.
    pub max_storage_bytes: u64,

    /// How long a successful conversion's outputs stay retrievable. Default: 20 minutes.
    pub reclaim_delay: Duration,

    /// Age past which [`crate::convert::ConversionService::sweep_stale`] reclaims a
    /// workspace. Default: 24 hours.
    pub stale_age: Duration,

    /// Rasterisation DPI used when a request does not name one. Default: 200.
    pub default_dpi: u32,

    /// JPEG quality for page images (1–100). Default: 85.
    pub jpeg_quality: u8,

    /// Wall-clock budget for the renderer subprocess in seconds. Default: 300.
    pub render_timeout_secs: u64,

    /// Renderer executable: a bare name looked up on `PATH` or an absolute
    /// path. Default: `libreoffice`.
    pub renderer_path: String,

    /// Pass `--invisible` to the renderer. Default: true.
    pub renderer_invisible: bool,

    /// Largest accepted upload in bytes. Default: 500 MiB.
    pub max_upload_bytes: u64,

    /// Treat a rasterisation failure after a successful render as a failed
    /// conversion. Default: false (the PDF is kept and the request reports
    /// success with zero pages and the rasterisation error attached).
    pub fail_on_rasterize_error: bool,

    /// Path to a pdfium shared library. If None, the system library is used.
    pub pdfium_library_path: Option<PathBuf>,

    /// Pre-constructed rasteriser. Takes precedence over `pdfium_library_path`.
    pub rasterizer: Option<Arc<dyn PageRasterizer>>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("temp"),
            max_storage_bytes: 10 * GIB,
            reclaim_delay: Duration::from_secs(20 * 60),
            stale_age: Duration::from_secs(24 * 60 * 60),
            default_dpi: 200,
            jpeg_quality: 85,
            render_timeout_secs: 300,
            renderer_path: "libreoffice".to_string(),
            renderer_invisible: true,
            max_upload_bytes: 500 * MIB,
            fail_on_rasterize_error: false,
            pdfium_library_path: None,
            rasterizer: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("workspace_root", &self.workspace_root)
            .field("max_storage_bytes", &self.max_storage_bytes)
            .field("reclaim_delay", &self.reclaim_delay)
            .field("stale_age", &self.stale_age)
            .field("default_dpi", &self.default_dpi)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("renderer_path", &self.renderer_path)
            .field("renderer_invisible", &self.renderer_invisible)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("fail_on_rasterize_error", &self.fail_on_rasterize_error)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field(
                "rasterizer",
                &self.rasterizer.as_ref().map(|_| "<dyn PageRasterizer>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// The quota expressed in GiB, for display.
    pub fn max_storage_gb(&self) -> f64 {
        self.max_storage_bytes as f64 / GIB as f64
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = root.into();
        self
    }

    pub fn max_storage_bytes(mut self, bytes: u64) -> Self {
        self.config.max_storage_bytes = bytes;
        self
    }

    /// Set the quota in GiB. Fractions are allowed; negative values become 0
    /// and are then rejected by [`Self::build`].
    pub fn max_storage_gb(mut self, gb: f64) -> Self {
        self.config.max_storage_bytes = (gb.max(0.0) * GIB as f64) as u64;
        self
    }

    pub fn reclaim_delay(mut self, delay: Duration) -> Self {
        self.config.reclaim_delay = delay;
        self
    }

    pub fn stale_age(mut self, age: Duration) -> Self {
        self.config.stale_age = age;
        self
    }

    pub fn default_dpi(mut self, dpi: u32) -> Self {
        self.config.default_dpi = dpi.clamp(MIN_DPI, MAX_DPI);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs;
        self
    }

    pub fn renderer_path(mut self, path: impl Into<String>) -> Self {
        self.config.renderer_path = path.into();
        self
    }

    pub fn renderer_invisible(mut self, v: bool) -> Self {
        self.config.renderer_invisible = v;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn fail_on_rasterize_error(mut self, v: bool) -> Self {
        self.config.fail_on_rasterize_error = v;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ServiceError> {
        let c = &self.config;
        if c.max_storage_bytes == 0 {
            return Err(ServiceError::InvalidConfig(
                "Maximum storage must be greater than 0".into(),
            ));
        }
        if c.reclaim_delay.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "Reclaim delay must be greater than 0".into(),
            ));
        }
        if c.render_timeout_secs == 0 {
            return Err(ServiceError::InvalidConfig(
                "Render timeout must be ≥ 1 second".into(),
            ));
        }
        if c.renderer_path.trim().is_empty() {
            return Err(ServiceError::InvalidConfig(
                "Renderer path must not be empty".into(),
            ));
        }
        if c.workspace_root.as_os_str().is_empty() {
            return Err(ServiceError::InvalidConfig(
                "Workspace root must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
