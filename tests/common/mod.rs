//! Shared fixtures for the integration tests.
//!
//! The office renderer is replaced by small shell scripts and the pdfium
//! backend by [`FakeRasterizer`]. The success script copies the deck it was
//! given to `<stem>.pdf`, so the "PDF" is really the (possibly unhidden)
//! zip container and the fake rasteriser can count the slides that would
//! have been rendered.

#![allow(dead_code)]

use edgequake_pptx2pdf::{PageRasterizer, PipelineError, RasterOptions, ServiceConfig};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

// ── Decks ────────────────────────────────────────────────────────────────────

/// Build a `.pptx`-shaped zip with one slide part per entry of `hidden`.
pub fn deck_bytes(hidden: &[bool]) -> Vec<u8> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = FileOptions::default();

    zip.start_file("[Content_Types].xml", options).unwrap();
    zip.write_all(br#"<?xml version="1.0"?><Types/>"#).unwrap();

    let mut ids = String::new();
    for i in 0..hidden.len() {
        ids.push_str(&format!(r#"<p:sldId id="{}" r:id="rId{}"/>"#, 256 + i, i + 2));
    }
    zip.start_file("ppt/presentation.xml", options).unwrap();
    zip.write_all(
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:presentation xmlns:p="urn:p" xmlns:r="urn:r"><p:sldIdLst>{ids}</p:sldIdLst></p:presentation>"#
        )
        .as_bytes(),
    )
    .unwrap();

    for (i, h) in hidden.iter().enumerate() {
        let show = if *h { r#" show="0""# } else { "" };
        zip.start_file(format!("ppt/slides/slide{}.xml", i + 1), options)
            .unwrap();
        zip.write_all(
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:p="urn:p"{show}><p:cSld><p:spTree/></p:cSld></p:sld>"#
            )
            .as_bytes(),
        )
        .unwrap();
    }

    zip.start_file("docProps/app.xml", options).unwrap();
    zip.write_all(b"<Properties/>").unwrap();
    zip.finish().unwrap().into_inner()
}

/// Number of slide parts in a container that are not hidden.
pub fn visible_slides(container: &Path) -> Result<usize, String> {
    let file = std::fs::File::open(container).map_err(|e| e.to_string())?;
    let mut archive = ZipArchive::new(file).map_err(|e| e.to_string())?;
    let names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(String::from)
        .collect();

    let mut visible = 0;
    for name in names {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(|e| e.to_string())?
            .read_to_string(&mut xml)
            .map_err(|e| e.to_string())?;
        if !xml.contains(r#"show="0""#) {
            visible += 1;
        }
    }
    Ok(visible)
}

// ── Fake renderers ───────────────────────────────────────────────────────────

const PARSE_ARGS: &str = r#"outdir=""; input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    --*) shift ;;
    *) input="$1"; shift ;;
  esac
done"#;

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

/// Renderer that "converts" by copying its input to `<outdir>/<stem>.pdf`
/// and appends the input path it was given to `log`.
pub fn copying_renderer(dir: &Path, log: &Path) -> String {
    write_script(
        dir,
        "fake-office",
        &format!(
            "{PARSE_ARGS}\necho \"$input\" >> '{}'\ncp \"$input\" \"$outdir/$(basename \"$input\" .pptx).pdf\"",
            log.display()
        ),
    )
}

/// Renderer that prints to both streams and exits 3.
pub fn failing_renderer(dir: &Path) -> String {
    write_script(dir, "fail-office", "echo 'converting'; echo 'boom' >&2; exit 3")
}

/// Renderer that succeeds without writing anything.
pub fn silent_renderer(dir: &Path) -> String {
    write_script(dir, "silent-office", "exit 0")
}

/// Renderer that never finishes on its own.
pub fn hanging_renderer(dir: &Path) -> String {
    write_script(dir, "hang-office", "sleep 60")
}

// ── Fake rasteriser ──────────────────────────────────────────────────────────

/// Writes one placeholder JPEG per visible slide in the "PDF".
#[derive(Default)]
pub struct FakeRasterizer {
    /// Fail after writing the first page.
    pub fail: bool,
    /// DPI of every call, in order.
    pub seen_dpi: Mutex<Vec<u32>>,
}

impl FakeRasterizer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl PageRasterizer for FakeRasterizer {
    fn rasterize(
        &self,
        pdf: &Path,
        out_dir: &Path,
        options: &RasterOptions,
    ) -> Result<Vec<String>, PipelineError> {
        self.seen_dpi.lock().unwrap().push(options.dpi);

        let pages = visible_slides(pdf).map_err(|detail| PipelineError::RasterizeFailed { detail })?;
        let mut names = Vec::with_capacity(pages);
        for n in 1..=pages {
            let name = format!("page_{:03}.jpg", n);
            std::fs::write(out_dir.join(&name), [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
            if self.fail {
                return Err(PipelineError::RasterizeFailed {
                    detail: "corrupt page tree".into(),
                });
            }
            names.push(name);
        }
        Ok(names)
    }
}

// ── Service fixture ──────────────────────────────────────────────────────────

pub struct Fixture {
    pub dir: TempDir,
    pub root: PathBuf,
    pub render_log: PathBuf,
    pub rasterizer: Arc<FakeRasterizer>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_rasterizer(FakeRasterizer::default())
    }

    pub fn with_rasterizer(rasterizer: FakeRasterizer) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("temp");
        let render_log = dir.path().join("render.log");
        Self {
            dir,
            root,
            render_log,
            rasterizer: Arc::new(rasterizer),
        }
    }

    /// Config wired to the copying renderer and the fake rasteriser.
    pub fn config(&self) -> edgequake_pptx2pdf::ServiceConfigBuilder {
        let renderer = copying_renderer(self.dir.path(), &self.render_log);
        self.config_with_renderer(renderer)
    }

    pub fn config_with_renderer(&self, renderer: String) -> edgequake_pptx2pdf::ServiceConfigBuilder {
        ServiceConfig::builder()
            .workspace_root(&self.root)
            .renderer_path(renderer)
            .render_timeout_secs(10)
            .reclaim_delay(Duration::from_secs(600))
            .rasterizer(self.rasterizer.clone())
    }

    /// Input paths the copying renderer was invoked with.
    pub fn rendered_inputs(&self) -> Vec<String> {
        std::fs::read_to_string(&self.render_log)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    /// Workspace directories currently under the root.
    pub fn workspace_dirs(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(&self.root) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
