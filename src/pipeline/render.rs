//! PDF rendering: drive the external office renderer as a subprocess.
//!
//! The renderer is invoked as
//!
//! ```text
//! <renderer> --headless [--invisible] --convert-to pdf --outdir <workspace> <input.pptx>
//! ```
//!
//! and is expected to drop `<input stem>.pdf` into the workspace.
//!
//! ## Timeouts
//!
//! The whole render shares one wall-clock budget. LibreOffice forks a
//! `soffice.bin` worker, so killing only the direct child would leave the
//! worker running. On unix the renderer is started in a fresh process group
//! and the group is sent `SIGKILL` when the budget runs out.

use crate::config::ServiceConfig;
use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How to invoke the renderer for one request.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Bare executable name (looked up on `PATH`) or an absolute path.
    pub renderer_path: String,
    /// Pass `--invisible`.
    pub invisible: bool,
    /// Wall-clock budget in seconds.
    pub timeout_secs: u64,
}

impl RenderOptions {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            renderer_path: config.renderer_path.clone(),
            invisible: config.renderer_invisible,
            timeout_secs: config.render_timeout_secs,
        }
    }
}

/// Resolve the renderer to an executable path.
///
/// A name containing a path separator must point at an existing file. A bare
/// name is searched on `PATH`.
pub fn locate_renderer(renderer: &str) -> Option<PathBuf> {
    let candidate = Path::new(renderer);
    if candidate.is_absolute() || renderer.contains(std::path::MAIN_SEPARATOR) {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(renderer))
        .find(|p| is_executable(p))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Render `input` into `out_dir` and return the produced PDF's path.
pub async fn render_to_pdf(
    input: &Path,
    out_dir: &Path,
    options: &RenderOptions,
) -> Result<PathBuf, PipelineError> {
    let renderer =
        locate_renderer(&options.renderer_path).ok_or_else(|| PipelineError::RendererUnavailable {
            path: options.renderer_path.clone(),
        })?;

    let mut cmd = Command::new(&renderer);
    cmd.arg("--headless");
    if options.invisible {
        cmd.arg("--invisible");
    }
    cmd.arg("--convert-to")
        .arg("pdf")
        .arg("--outdir")
        .arg(out_dir)
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    info!(
        "Rendering {} with {}",
        input.display(),
        renderer.display()
    );

    let child = cmd.spawn().map_err(|e| PipelineError::RenderFailed {
        detail: format!("failed to start '{}': {}", renderer.display(), e),
    })?;
    let pid = child.id();

    let budget = Duration::from_secs(options.timeout_secs);
    let output = match tokio::time::timeout(budget, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(PipelineError::RenderFailed {
                detail: format!("failed to wait for renderer: {}", e),
            })
        }
        Err(_) => {
            // The child itself is killed on drop; take its workers down too.
            kill_process_group(pid);
            warn!(
                "Renderer exceeded {}s on {}",
                options.timeout_secs,
                input.display()
            );
            return Err(PipelineError::RenderTimeout {
                secs: options.timeout_secs,
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        warn!("Renderer exited with {}: {}", output.status, detail);
        return Err(PipelineError::RenderFailed { detail });
    }

    let pdf = find_pdf(out_dir, input)?;
    debug!("Renderer produced {}", pdf.display());
    Ok(pdf)
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    let group = Pid::from_raw(pid as i32);
    if let Err(e) = killpg(group, Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Locate the PDF the renderer wrote for `input`.
///
/// Prefers `<input stem>.pdf`; otherwise takes the first `.pdf` in name
/// order.
pub fn find_pdf(out_dir: &Path, input: &Path) -> Result<PathBuf, PipelineError> {
    if let Some(stem) = input.file_stem() {
        let expected = out_dir.join(format!("{}.pdf", stem.to_string_lossy()));
        if expected.is_file() {
            return Ok(expected);
        }
    }

    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(out_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
                })
                .collect()
        })
        .unwrap_or_default();
    pdfs.sort();

    pdfs.into_iter()
        .next()
        .ok_or_else(|| PipelineError::NoOutputProduced {
            dir: out_dir.to_path_buf(),
        })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    const WRITES_PDF: &str = r#"outdir=""; input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    --*) shift ;;
    *) input="$1"; shift ;;
  esac
done
printf '%%PDF-1.4 fake' > "$outdir/$(basename "$input" .pptx).pdf""#;

    fn options(path: String, timeout_secs: u64) -> RenderOptions {
        RenderOptions {
            renderer_path: path,
            invisible: true,
            timeout_secs,
        }
    }

    fn input(dir: &Path) -> PathBuf {
        let p = dir.join("input_1.pptx");
        std::fs::write(&p, b"PK\x03\x04").unwrap();
        p
    }

    #[tokio::test]
    async fn successful_render_returns_pdf_path() {
        let dir = TempDir::new().unwrap();
        let bin = script(dir.path(), "fake-office", WRITES_PDF);
        let out = dir.path().join("ws");
        std::fs::create_dir(&out).unwrap();

        let pdf = render_to_pdf(&input(dir.path()), &out, &options(bin, 10))
            .await
            .unwrap();
        assert_eq!(pdf, out.join("input_1.pdf"));
    }

    #[tokio::test]
    async fn failure_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let bin = script(dir.path(), "fail", "echo out; echo boom >&2; exit 3");

        let err = render_to_pdf(&input(dir.path()), dir.path(), &options(bin, 10))
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::RenderFailed { detail: "boom".into() });
    }

    #[tokio::test]
    async fn failure_falls_back_to_stdout() {
        let dir = TempDir::new().unwrap();
        let bin = script(dir.path(), "fail", "echo only-stdout; exit 1");

        let err = render_to_pdf(&input(dir.path()), dir.path(), &options(bin, 10))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::RenderFailed {
                detail: "only-stdout".into()
            }
        );
    }

    #[tokio::test]
    async fn silent_success_is_no_output() {
        let dir = TempDir::new().unwrap();
        let bin = script(dir.path(), "silent", "exit 0");
        let out = dir.path().join("ws");
        std::fs::create_dir(&out).unwrap();

        let err = render_to_pdf(&input(dir.path()), &out, &options(bin, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoOutputProduced { .. }));
    }

    #[tokio::test]
    async fn slow_renderer_times_out() {
        let dir = TempDir::new().unwrap();
        let bin = script(dir.path(), "slow", "sleep 30");

        let started = std::time::Instant::now();
        let err = render_to_pdf(&input(dir.path()), dir.path(), &options(bin, 1))
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::RenderTimeout { secs: 1 });
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    /// Alive and not a zombie waiting to be reaped.
    fn process_alive(pid: i32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid), None).is_err() {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => !stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn timeout_kills_forked_workers() {
        let dir = TempDir::new().unwrap();
        let pid_file = dir.path().join("worker.pid");
        let bin = script(
            dir.path(),
            "forking",
            &format!("sleep 60 &\necho $! > '{}'\nwait", pid_file.display()),
        );

        let err = render_to_pdf(&input(dir.path()), dir.path(), &options(bin, 1))
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::RenderTimeout { secs: 1 });

        let worker: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while process_alive(worker) && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!process_alive(worker), "worker {worker} survived the timeout");
    }

    #[tokio::test]
    async fn missing_renderer_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no-such-office").to_string_lossy().into_owned();

        let err = render_to_pdf(&input(dir.path()), dir.path(), &options(missing.clone(), 10))
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::RendererUnavailable { path: missing });
    }

    #[test]
    fn bare_name_searches_path() {
        assert!(locate_renderer("sh").is_some());
        assert!(locate_renderer("definitely-not-an-office-suite-xyz").is_none());
    }

    #[test]
    fn find_pdf_prefers_input_stem() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("deck.pdf"), b"x").unwrap();
        let found = find_pdf(dir.path(), Path::new("deck.pptx")).unwrap();
        assert_eq!(found, dir.path().join("deck.pdf"));

        let found = find_pdf(dir.path(), Path::new("other.pptx")).unwrap();
        assert_eq!(found, dir.path().join("a.pdf"));
    }
}
