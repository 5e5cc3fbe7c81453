//! CLI binary for scanprep.
//!
//! `scanprep serve` runs the HTTP service; `scanprep process` runs the same
//! pipeline on a local file. Both are thin shims over the library crate.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use scanprep::steps::{OCR_DENOISE_LEVEL, OCR_ENHANCE_FACTOR};
use scanprep::{
    process_file, serve, PageProgressCallback, PipelineSpec, ProcessContext, ProgressCallback,
    ServiceConfig, StepParams, WorkspaceManager,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress bar plus one line per finished page. Pages may finish
/// out of order when `--page-concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl PageProgressCallback for CliProgressCallback {
    fn on_document_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Processing");
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, output_bytes: u64) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{:>6} KiB", output_bytes / 1024)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(error),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        if self.errors.load(Ordering::SeqCst) == 0 && success_count == total_pages {
            eprintln!(
                "{} {} pages processed",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!("{} processing failed", red("✘"));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on port 5000
  scanprep serve

  # Default pipeline on a scan
  scanprep process scan.png -o clean.png

  # Multi-page PDF → zip of processed pages
  scanprep process contract.pdf -o processed_images.zip

  # Custom steps and parameters
  scanprep process scan.jpg --step deskew --step binarize \
      --params '{"binarize_threshold": 150}'

  # Preset tuned for cloud OCR engines
  scanprep process scan.png --preset ocr --enhance-factor 1.8

STEPS:
  deskew, denoise, binarize, enhance, resize, sharpen, remove_borders

ENVIRONMENT VARIABLES:
  PORT                       Listening port for `serve` (default 5000)
  SCANPREP_HOST              Bind address (default 0.0.0.0)
  SCANPREP_SCRATCH_DIR       Root for per-request scratch directories
  SCANPREP_KEEP_WORKSPACES   Keep scratch directories for debugging
  SCANPREP_PAGE_CONCURRENCY  Pages processed at once
  PDFIUM_LIB_PATH            Path to libpdfium (default: system library)
  RUST_LOG                   Log filter, e.g. scanprep=debug
"#;

/// Prepare scanned images and PDFs for OCR.
#[derive(Parser, Debug)]
#[command(
    name = "scanprep",
    version,
    about = "Prepare scanned images and PDFs for OCR",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SCANPREP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SCANPREP_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP preprocessing service.
    Serve(ServeArgs),
    /// Process a local image or PDF.
    Process(ProcessArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Listening port.
    #[arg(long, env = "PORT", default_value_t = scanprep::config::DEFAULT_PORT)]
    port: u16,

    /// Interface to bind.
    #[arg(long, env = "SCANPREP_HOST", default_value = "0.0.0.0")]
    host: String,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Root directory for per-request scratch directories.
    #[arg(long, env = "SCANPREP_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Keep scratch directories after each request (debugging).
    #[arg(long, env = "SCANPREP_KEEP_WORKSPACES")]
    keep_workspaces: bool,

    /// Pages run through the pipeline at once.
    #[arg(long, env = "SCANPREP_PAGE_CONCURRENCY", default_value_t = 1)]
    page_concurrency: usize,

    /// PDF rasterisation DPI (72–600).
    #[arg(long, env = "SCANPREP_DPI", default_value_t = scanprep::config::DEFAULT_PDF_DPI,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Path to libpdfium; the system library is used when unset.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Image or PDF to process.
    input: PathBuf,

    /// Where to write the result. Defaults to `processed.png` for a single
    /// page and `processed_images.zip` for several.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Step to run; repeat for several. Overrides --preset.
    #[arg(long = "step", value_name = "STEP")]
    steps: Vec<String>,

    /// JSON object of step parameters (e.g. '{"denoise_level": 2}').
    #[arg(long)]
    params: Option<String>,

    /// Pipeline preset used when no --step is given.
    #[arg(long, value_enum, default_value = "default")]
    preset: Preset,

    /// Enhancement factor for the `ocr` preset.
    #[arg(long, default_value_t = OCR_ENHANCE_FACTOR)]
    enhance_factor: f32,

    /// Denoise level for the `ocr` preset.
    #[arg(long, default_value_t = OCR_DENOISE_LEVEL)]
    denoise_level: i32,

    /// Disable progress bar.
    #[arg(long, env = "SCANPREP_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Preset {
    /// deskew → denoise → binarize → enhance
    Default,
    /// deskew → enhance → denoise, no binarisation
    Ocr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // While the progress bar is up, only errors are logged; the bar covers
    // the rest.
    let show_progress = matches!(&cli.command, Command::Process(a) if !a.no_progress) && !cli.quiet;
    let filter = if cli.verbose {
        "scanprep=debug,tower_http=debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "scanprep=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => {
            let config = build_config(&args.common)?
                .port(args.port)
                .bind_host(args.host)
                .build()
                .context("Invalid service configuration")?;
            serve(config).await.context("Service failed")?;
        }
        Command::Process(args) => run_process(args, show_progress, cli.quiet).await?,
    }
    Ok(())
}

async fn run_process(args: ProcessArgs, show_progress: bool, quiet: bool) -> Result<()> {
    // One-off runs default to the system temp dir instead of next to the binary.
    let mut builder = build_config(&args.common)?;
    if args.common.scratch_dir.is_none() {
        builder = builder.scratch_root(std::env::temp_dir().join("scanprep"));
    }
    let config = builder.build().context("Invalid configuration")?;

    let spec = if args.steps.is_empty() {
        match args.preset {
            Preset::Default => PipelineSpec::default_pipeline(),
            Preset::Ocr => PipelineSpec::ocr_optimized(args.enhance_factor, args.denoise_level),
        }
    } else {
        let params = args
            .params
            .as_deref()
            .map(StepParams::from_json_lenient)
            .unwrap_or_default();
        PipelineSpec::from_named_steps(&args.steps, &params)
    };

    let mut ctx = ProcessContext::from_config(&config);
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        ctx = ctx.with_progress(cb);
    }
    let workspaces = WorkspaceManager::new(&config.scratch_root, config.keep_workspaces)
        .context("Failed to prepare scratch directory")?;

    // The output name depends on the page count, which is only known after
    // processing; write to a staging name first when none was given.
    let staging = std::env::temp_dir().join(format!("scanprep-{}.out", std::process::id()));
    let target = args.output.clone().unwrap_or_else(|| staging.clone());

    let stats = process_file(&args.input, &target, &spec, &workspaces, &ctx)
        .await
        .with_context(|| format!("Failed to process {}", args.input.display()))?;

    let written = match args.output {
        Some(path) => path,
        None => {
            let name = if stats.pages > 1 {
                scanprep::output::ARCHIVE_FILENAME
            } else {
                scanprep::output::IMAGE_FILENAME
            };
            let dest = PathBuf::from(name);
            move_into_place(&staging, &dest)?;
            dest
        }
    };

    if !quiet {
        eprintln!(
            "{} {} → {}  {}",
            green("✔"),
            args.input.display(),
            bold(&written.display().to_string()),
            dim(&format!(
                "{} page(s), {} KiB, {:.1}s",
                stats.pages,
                stats.output_bytes / 1024,
                stats.total_ms as f64 / 1000.0
            )),
        );
    }
    Ok(())
}

/// Move the staged output to `dest`. `rename` fails across filesystems (the
/// temp dir is often a tmpfs), so fall back to copying.
fn move_into_place(staging: &Path, dest: &Path) -> Result<()> {
    if let Err(e) = std::fs::rename(staging, dest) {
        tracing::debug!(error = %e, "Rename failed, copying staged output instead");
        std::fs::copy(staging, dest)
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        if let Err(e) = std::fs::remove_file(staging) {
            tracing::warn!(
                path = %staging.display(),
                error = %e,
                "Failed to remove staged output"
            );
        }
    }
    Ok(())
}

/// Map shared flags onto a config builder. Flags left at their defaults do
/// not override what the environment already provided.
fn build_config(common: &CommonArgs) -> Result<scanprep::ServiceConfigBuilder> {
    let base = ServiceConfig::from_env().context("Invalid environment configuration")?;
    let mut builder = ServiceConfig::builder()
        .scratch_root(base.scratch_root)
        .keep_workspaces(base.keep_workspaces || common.keep_workspaces)
        .page_concurrency(common.page_concurrency)
        .pdf_dpi(common.dpi);
    if let Some(dir) = &common.scratch_dir {
        builder = builder.scratch_root(dir);
    }
    if let Some(lib) = common.pdfium_lib.as_ref().or(base.pdfium_library_path.as_ref()) {
        builder = builder.pdfium_library_path(lib);
    }
    Ok(builder)
}
