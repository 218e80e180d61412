//! Hidden-slide rewrite: produce a copy of a `.pptx` with every slide visible.
//!
//! A `.pptx` is a zip container of XML parts. A slide is hidden when its root
//! `<p:sld>` element carries `show="0"`. The rewrite forces `show="1"` on
//! that root element of every `ppt/slides/slideN.xml` and on every `sldId`
//! entry of `ppt/presentation.xml`, so the renderer emits one PDF page per
//! slide, hidden ones included.
//!
//! Only those parts are decompressed and re-serialised. Every other entry
//! is copied raw, compressed bytes untouched, in its original order.
//!
//! The rewrite is best effort: any failure is logged and reported as `None`,
//! and the caller renders the original file instead.

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Suffix appended to the input stem for the rewritten copy.
pub const UNHIDDEN_SUFFIX: &str = "_unhidden";

const PRESENTATION_PART: &str = "ppt/presentation.xml";

/// Upper bound on the buffer reserved from an entry's declared size. The
/// header is uploader-controlled; larger parts grow the buffer as they read.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

static SLIDE_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide\d+\.xml$").unwrap());

#[derive(Debug, Error)]
enum UnhideError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("part '{0}' is not UTF-8")]
    NotUtf8(String),
}

/// Which elements of a part get `show="1"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rewrite {
    /// Every element whose local name is `sldId`.
    SlideIds,
    /// Only the document's root element.
    Root,
}

/// Path of the rewritten copy for `input`: `<dir>/<stem>_unhidden.pptx`.
pub fn unhidden_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "presentation".to_string());
    input.with_file_name(format!("{stem}{UNHIDDEN_SUFFIX}.pptx"))
}

/// Write a copy of `input` with every slide forced visible.
///
/// Returns the path of the copy, or `None` if the input could not be
/// rewritten. No partial file is left behind on failure.
pub fn unhide_slides(input: &Path) -> Option<PathBuf> {
    let target = unhidden_path(input);
    match rewrite_container(input, &target) {
        Ok(forced) => {
            info!(
                "Unhid slides in {} ({} elements set visible)",
                input.display(),
                forced
            );
            Some(target)
        }
        Err(e) => {
            warn!(
                "Could not unhide slides in {}: {}; rendering original",
                input.display(),
                e
            );
            let _ = std::fs::remove_file(&target);
            None
        }
    }
}

/// Rebuild the container into a temp file beside `target`, then move it
/// into place. Returns how many elements were rewritten.
fn rewrite_container(input: &Path, target: &Path) -> Result<usize, UnhideError> {
    let bytes = std::fs::read(input)?;
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;
    let mut forced = 0usize;

    {
        let mut writer = ZipWriter::new(tmp.as_file());
        for i in 0..archive.len() {
            let name = archive.by_index_raw(i)?.name().to_string();
            let mode = if name == PRESENTATION_PART {
                Some(Rewrite::SlideIds)
            } else if SLIDE_PART.is_match(&name) {
                Some(Rewrite::Root)
            } else {
                None
            };

            match mode {
                Some(mode) => {
                    let entry = archive.by_index(i)?;
                    let declared = entry.size();
                    let raw = read_part(entry, declared)?;

                    let xml = String::from_utf8(raw)
                        .map_err(|_| UnhideError::NotUtf8(name.clone()))?;
                    let (rewritten, count) = force_visible(&xml, mode)?;
                    forced += count;
                    debug!("Rewrote {} ({} elements)", name, count);

                    let options =
                        FileOptions::default().compression_method(CompressionMethod::Deflated);
                    writer.start_file(name.as_str(), options)?;
                    writer.write_all(&rewritten)?;
                }
                None => {
                    let entry = archive.by_index_raw(i)?;
                    writer.raw_copy_file(entry)?;
                }
            }
        }
        writer.finish()?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(forced)
}

/// Read a whole part, reserving at most [`MAX_PREALLOC`] up front whatever
/// size the header declares.
fn read_part(mut reader: impl Read, declared: u64) -> std::io::Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(declared.min(MAX_PREALLOC) as usize);
    reader.read_to_end(&mut raw)?;
    Ok(raw)
}

/// Re-serialise one XML part with `show="1"` on the selected elements.
fn force_visible(xml: &str, mode: Rewrite) -> Result<(Vec<u8>, usize), UnhideError> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(xml.len() + 64)));
    let mut seen_root = false;
    let mut count = 0usize;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) => {
                if selects(&e, mode, &mut seen_root) {
                    count += 1;
                    writer.write_event(Event::Start(with_show(&e)?))?;
                } else {
                    writer.write_event(Event::Start(e))?;
                }
            }
            Event::Empty(e) => {
                if selects(&e, mode, &mut seen_root) {
                    count += 1;
                    writer.write_event(Event::Empty(with_show(&e)?))?;
                } else {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            other => writer.write_event(other)?,
        }
    }

    Ok((writer.into_inner().into_inner(), count))
}

fn selects(e: &BytesStart<'_>, mode: Rewrite, seen_root: &mut bool) -> bool {
    match mode {
        Rewrite::SlideIds => e.local_name().as_ref() == b"sldId",
        Rewrite::Root => !std::mem::replace(seen_root, true),
    }
}

/// Copy of `e` with any existing `show` attribute replaced by `show="1"`.
fn with_show(e: &BytesStart<'_>) -> Result<BytesStart<'static>, UnhideError> {
    let name = std::str::from_utf8(e.name().as_ref())
        .map_err(|_| UnhideError::NotUtf8("element name".into()))?
        .to_string();
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == b"show" {
            continue;
        }
        out.push_attribute(attr);
    }
    out.push_attribute(("show", "1"));
    Ok(out.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PRESENTATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:presentation xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main" xmlns:r="r"><p:sldIdLst><p:sldId id="256" r:id="rId2"/><p:sldId id="257" r:id="rId3" show="0"/></p:sldIdLst></p:presentation>"#;

    fn slide(hidden: bool) -> String {
        let show = if hidden { r#" show="0""# } else { "" };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"{show}><p:cSld><p:spTree><p:sp show="0"/></p:spTree></p:cSld></p:sld>"#
        )
    }

    fn build_deck(dir: &Path, hidden: &[bool]) -> PathBuf {
        let path = dir.join("deck.pptx");
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default();
        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(b"<Types/>").unwrap();
        zip.start_file(PRESENTATION_PART, options).unwrap();
        zip.write_all(PRESENTATION.as_bytes()).unwrap();
        for (i, h) in hidden.iter().enumerate() {
            zip.start_file(format!("ppt/slides/slide{}.xml", i + 1), options)
                .unwrap();
            zip.write_all(slide(*h).as_bytes()).unwrap();
        }
        zip.start_file("ppt/media/image1.png", options).unwrap();
        zip.write_all(&[0x89, b'P', b'N', b'G', 1, 2, 3]).unwrap();
        zip.finish().unwrap();
        path
    }

    fn read_entry(path: &Path, name: &str) -> String {
        let mut archive = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
        let mut s = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn hidden_slides_become_visible() {
        let dir = TempDir::new().unwrap();
        let deck = build_deck(dir.path(), &[false, true, true]);

        let out = unhide_slides(&deck).expect("rewrite succeeds");
        assert_eq!(out, dir.path().join("deck_unhidden.pptx"));

        for n in 1..=3 {
            let xml = read_entry(&out, &format!("ppt/slides/slide{n}.xml"));
            assert!(xml.contains(r#"<p:sld xmlns:p="#), "got: {xml}");
            assert!(!xml.contains(r#"show="0"><p:cSld>"#), "slide {n}: {xml}");
            assert!(xml.contains(r#"show="1"><p:cSld>"#), "slide {n}: {xml}");
            // Only the root element is touched.
            assert!(xml.contains(r#"<p:sp show="0"/>"#), "slide {n}: {xml}");
        }

        let pres = read_entry(&out, PRESENTATION_PART);
        assert_eq!(pres.matches(r#"show="1""#).count(), 2, "got: {pres}");
        assert!(!pres.contains(r#"show="0""#));
        assert!(pres.contains(r#"r:id="rId3""#));
    }

    #[test]
    fn declared_size_does_not_drive_allocation() {
        let part = b"<p:sld/>".to_vec();
        let raw = read_part(part.as_slice(), u64::MAX).unwrap();
        assert_eq!(raw, part);
        assert!(raw.capacity() as u64 <= MAX_PREALLOC);
    }

    #[test]
    fn untouched_entries_keep_order_and_bytes() {
        let dir = TempDir::new().unwrap();
        let deck = build_deck(dir.path(), &[true]);
        let out = unhide_slides(&deck).unwrap();

        let names = |p: &Path| {
            let mut archive = ZipArchive::new(std::fs::File::open(p).unwrap()).unwrap();
            (0..archive.len())
                .map(|i| archive.by_index_raw(i).unwrap().name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&deck), names(&out));

        let mut archive = ZipArchive::new(std::fs::File::open(&out).unwrap()).unwrap();
        assert_eq!(archive.by_index(0).unwrap().name(), "[Content_Types].xml");
        let mut media = Vec::new();
        archive
            .by_name("ppt/media/image1.png")
            .unwrap()
            .read_to_end(&mut media)
            .unwrap();
        assert_eq!(media, vec![0x89, b'P', b'N', b'G', 1, 2, 3]);
    }

    #[test]
    fn input_file_is_not_modified() {
        let dir = TempDir::new().unwrap();
        let deck = build_deck(dir.path(), &[true]);
        let original = std::fs::read(&deck).unwrap();
        unhide_slides(&deck).unwrap();
        assert_eq!(std::fs::read(&deck).unwrap(), original);
    }

    #[test]
    fn corrupt_container_yields_none_and_no_file() {
        let dir = TempDir::new().unwrap();
        let deck = dir.path().join("broken.pptx");
        std::fs::write(&deck, b"PK\x03\x04 definitely not a zip").unwrap();

        assert!(unhide_slides(&deck).is_none());
        assert!(!dir.path().join("broken_unhidden.pptx").exists());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn missing_input_yields_none() {
        let dir = TempDir::new().unwrap();
        assert!(unhide_slides(&dir.path().join("nope.pptx")).is_none());
    }

    #[test]
    fn root_rewrite_touches_first_element_only() {
        let (out, count) = force_visible(&slide(true), Rewrite::Root).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(count, 1);
        assert!(out.contains(r#"<p:sp show="0"/>"#));
        assert!(out.starts_with("<?xml"));
    }
}
