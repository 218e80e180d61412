//! CLI binary for edgequake-pptx2pdf.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `ServiceConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pptx2pdf::{
    ConversionOutput, ConversionService, ConvertRequest, ServiceConfig, StorageStatus, SweepReport,
    WorkspaceStatus,
};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── Unit conversion ──────────────────────────────────────────────────────────

/// Flag and env values are unbounded, so saturate instead of overflowing.
fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}
fn hours(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(3600))
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a deck, hidden slides included
  pptx2pdf convert slides.pptx

  # Visible slides only, 300 DPI page images, JSON result
  pptx2pdf convert --no-hidden --dpi 300 --json slides.pptx

  # Keep the outputs around for 5 minutes, then reclaim them
  pptx2pdf convert --keep-minutes 5 slides.pptx

  # Inspect a workspace
  pptx2pdf status temp_1718000000000

  # Reclaim everything, or only workspaces older than 24h
  pptx2pdf sweep
  pptx2pdf sweep --older-than-hours 24

  # Storage usage and liveness
  pptx2pdf storage
  pptx2pdf health

ENVIRONMENT VARIABLES:
  TEMP_FOLDER                   Workspace root (default: temp)
  MAX_STORAGE_GB                Storage quota in GiB (default: 10)
  DEFAULT_CLEANUP_MINUTES       Retrieval window after a conversion (default: 20)
  AUTO_CLEANUP_OLD_FILES_HOURS  Age used by `sweep --stale` (default: 24)
  DEFAULT_DPI                   Page image DPI (default: 200)
  CONVERSION_TIMEOUT_SECONDS    Renderer wall-clock budget (default: 300)
  LIBREOFFICE_PATH              Renderer executable (default: libreoffice)
  MAX_CONTENT_LENGTH            Largest accepted upload in bytes (default: 500 MiB)
  PDFIUM_LIB_PATH               pdfium shared library or its directory
  RUST_LOG                      Overrides the log filter
"#;

/// Convert PowerPoint decks to PDF and per-page JPEG images.
#[derive(Parser, Debug)]
#[command(
    name = "pptx2pdf",
    version,
    about = "Convert PowerPoint decks to PDF and per-page JPEG images",
    long_about = "Convert .pptx slide decks to PDF with LibreOffice, then rasterise every page \
to JPEG. Each conversion gets its own workspace directory that is reclaimed automatically once \
the retrieval window closes.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    service: ServiceArgs,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PPTX2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PPTX2PDF_QUIET")]
    quiet: bool,
}

#[derive(Args, Debug)]
struct ServiceArgs {
    /// Directory holding one sub-directory per conversion.
    #[arg(long, global = true, env = "TEMP_FOLDER", default_value = "temp")]
    temp_folder: PathBuf,

    /// Storage quota in GiB; new conversions are refused at or above it.
    #[arg(long, global = true, env = "MAX_STORAGE_GB", default_value_t = 10.0)]
    max_storage_gb: f64,

    /// Minutes a conversion's outputs stay retrievable.
    #[arg(long, global = true, env = "DEFAULT_CLEANUP_MINUTES", default_value_t = 20)]
    cleanup_minutes: u64,

    /// Age in hours used by `sweep --stale`.
    #[arg(long, global = true, env = "AUTO_CLEANUP_OLD_FILES_HOURS", default_value_t = 24)]
    stale_hours: u64,

    /// Default page image DPI (72–600).
    #[arg(long, global = true, env = "DEFAULT_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    default_dpi: u32,

    /// Renderer wall-clock budget in seconds.
    #[arg(long, global = true, env = "CONVERSION_TIMEOUT_SECONDS", default_value_t = 300)]
    timeout: u64,

    /// Renderer executable: a name on PATH or an absolute path.
    #[arg(long, global = true, env = "LIBREOFFICE_PATH", default_value = "libreoffice")]
    libreoffice: String,

    /// Largest accepted upload in bytes.
    #[arg(long, global = true, env = "MAX_CONTENT_LENGTH", default_value_t = 500 * 1024 * 1024)]
    max_upload_bytes: u64,

    /// pdfium shared library, or the directory containing it.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Treat a page-image failure as a failed conversion instead of keeping the PDF.
    #[arg(long, global = true, env = "FAIL_ON_RASTERIZE_ERROR")]
    strict_images: bool,
}

impl ServiceArgs {
    fn to_config(&self) -> Result<ServiceConfig> {
        let mut builder = ServiceConfig::builder()
            .workspace_root(&self.temp_folder)
            .max_storage_gb(self.max_storage_gb)
            .reclaim_delay(minutes(self.cleanup_minutes))
            .stale_age(hours(self.stale_hours))
            .default_dpi(self.default_dpi)
            .render_timeout_secs(self.timeout)
            .renderer_path(&self.libreoffice)
            .max_upload_bytes(self.max_upload_bytes)
            .fail_on_rasterize_error(self.strict_images);
        if let Some(ref lib) = self.pdfium_lib {
            builder = builder.pdfium_library_path(lib);
        }
        builder.build().context("Invalid configuration")
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a .pptx file to PDF and page images.
    Convert {
        /// Path to the .pptx deck.
        input: PathBuf,

        /// Render only visible slides.
        #[arg(long)]
        no_hidden: bool,

        /// Page image DPI for this conversion (72–600).
        #[arg(long, value_parser = clap::value_parser!(u32).range(72..=600))]
        dpi: Option<u32>,

        /// Stay running for this many minutes, then reclaim the workspace.
        #[arg(long)]
        keep_minutes: Option<u64>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the contents of a workspace.
    Status {
        /// Workspace id, e.g. temp_1718000000000.
        id: String,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Reclaim workspaces now.
    Sweep {
        /// Only reclaim workspaces older than this many hours.
        #[arg(long, conflicts_with = "stale")]
        older_than_hours: Option<u64>,

        /// Only reclaim workspaces older than AUTO_CLEANUP_OLD_FILES_HOURS.
        #[arg(long)]
        stale: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show storage usage against the quota.
    Storage {
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Report whether the service can accept conversions.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = cli.service.to_config()?;
    let service = ConversionService::new(config).context("Failed to initialise workspace root")?;

    match cli.command {
        Command::Convert {
            input,
            no_hidden,
            dpi,
            keep_minutes,
            json,
        } => {
            service.startup().await.context("Startup sweep failed")?;

            let mut request = ConvertRequest::from_path(&input)
                .await
                .with_context(|| format!("Cannot read {}", input.display()))?
                .include_hidden(!no_hidden);
            if let Some(dpi) = dpi {
                request = request.dpi(dpi);
            }
            if let Some(keep) = keep_minutes {
                request = request.reclaim_after(minutes(keep));
            }

            let output = service.convert(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else if !cli.quiet {
                print_conversion(&output, &service);
            }
            if !output.success {
                let reason = output
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".into());
                anyhow::bail!("Conversion failed: {}", reason);
            }

            match keep_minutes {
                Some(keep) => hold(&service, minutes(keep)).await?,
                None => {
                    service.shutdown();
                }
            }
        }

        Command::Status { id, json } => {
            let status = service.workspace_status(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }

        Command::Sweep {
            older_than_hours,
            stale,
            json,
        } => {
            let report = match (older_than_hours, stale) {
                (Some(hours), _) => service.sweep_older_than(hours).await?,
                (None, true) => service.sweep_stale().await?,
                (None, false) => service.sweep_all().await?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if !cli.quiet {
                print_sweep(&report);
            }
        }

        Command::Storage { json } => {
            let status = service.storage_status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_storage(&status);
            }
        }

        Command::Health => {
            let report = service.health().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.healthy {
                anyhow::bail!("Storage quota exhausted");
            }
        }
    }

    Ok(())
}

/// Keep the process alive until the reclamation timer has fired or the user
/// interrupts, in which case the workspaces are reclaimed immediately.
async fn hold(service: &ConversionService, keep: Duration) -> Result<()> {
    eprintln!(
        "{}",
        dim(&format!(
            "Outputs kept for {}s; press Ctrl-C to reclaim now.",
            keep.as_secs()
        ))
    );
    tokio::select! {
        _ = tokio::time::sleep(keep + Duration::from_secs(1)) => {
            info!("Retrieval window closed");
        }
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for Ctrl-C")?;
            let report = service.sweep_all().await?;
            info!("Interrupted: reclaimed {} workspaces", report.cleaned.len());
        }
    }
    service.shutdown();
    Ok(())
}

fn print_conversion(output: &ConversionOutput, service: &ConversionService) {
    if !output.success {
        eprintln!(
            "{} {}",
            red("✗"),
            bold(&format!("Conversion failed ({})", output.workspace_id))
        );
        return;
    }

    eprintln!(
        "{} {} {}",
        green("✓"),
        bold(&format!("{} pages", output.total_pages)),
        dim(&format!("in {}", output.workspace_id))
    );
    for name in output.artifact_names() {
        match service.resolve_artifact(&output.workspace_id, name) {
            Some(path) => println!("{}", path.display()),
            None => println!("{}", name),
        }
    }
    if output.hidden_slides_unhidden {
        eprintln!("  {}", dim("hidden slides included"));
    }
    if let Some(ref e) = output.error {
        eprintln!("  {} {}", yellow("⚠"), e);
    }
    if let Some(secs) = output.reclaim_after_secs {
        eprintln!("  {}", dim(&format!("reclaimed in {}s", secs)));
    }
}

fn print_status(status: &WorkspaceStatus) {
    println!("{}", bold(&status.workspace_id));
    println!("  files:   {}", status.total_files);
    println!("  size:    {} bytes", status.size_bytes);
    for pdf in &status.pdf_files {
        println!("  pdf:     {}", pdf);
    }
    println!("  images:  {}", status.image_files.len());
    match status.reclaim_in_secs {
        Some(secs) => println!("  reclaim: in {}s", secs),
        None => println!("  reclaim: {}", dim("not scheduled in this process")),
    }
}

fn print_sweep(report: &SweepReport) {
    eprintln!(
        "{} Reclaimed {} workspaces, freed {:.2} MB",
        green("✓"),
        bold(&report.cleaned.len().to_string()),
        report.freed_mb()
    );
    for id in &report.failed {
        eprintln!("  {} {}", red("✗"), id);
    }
}

fn print_storage(status: &StorageStatus) {
    let gib = |b: u64| b as f64 / (1024.0 * 1024.0 * 1024.0);
    let line = format!(
        "{:.2} / {:.2} GiB ({:.1}%)",
        gib(status.used_bytes),
        gib(status.max_bytes),
        status.usage_percent
    );
    let line = if status.critical {
        red(&line)
    } else if status.warning {
        yellow(&line)
    } else {
        green(&line)
    };
    println!("{}", line);
    println!(
        "  {}",
        dim(&format!("{} pending reclamations", status.pending_reclamations))
    );
}
