//! CLI binary for edgequake-book2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AcquisitionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_book2pdf::{
    download_book, AcquisitionConfig, AcquisitionProgressCallback, AssetMode, BookOutput,
    BookSession, ProgressCallback, RunOutcome, Schedule, StopHandle,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit status for a book that was written but stopped early.
const EXIT_PARTIAL: i32 = 2;

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar advanced per page attempted, with a
/// log line for every page that was skipped or failed.
struct CliProgressCallback {
    bar: ProgressBar,
    missing: AtomicUsize,
    failed: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Fetching");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            missing: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        })
    }
}

impl AcquisitionProgressCallback for CliProgressCallback {
    fn on_acquisition_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.reset_eta();
    }

    fn on_page_located(&self, page_num: usize, _total: usize, _url: &str) {
        self.bar.set_message(dim(&format!("page {page_num}")));
    }

    fn on_page_missing(&self, page_num: usize, total: usize) {
        self.missing.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Page {:>4}/{:<4}  {}",
            yellow("–"),
            page_num,
            total,
            dim("not found")
        ));
        self.bar.inc(1);
    }

    fn on_page_assembled(&self, _page_num: usize, _total: usize) {
        self.bar.inc(1);
    }

    fn on_page_skipped(&self, _page_num: usize, _total: usize) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 90 {
            error.chars().take(89).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>4}/{:<4}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg)
        ));
    }

    fn on_acquisition_complete(&self, total_pages: usize, pages_written: usize) {
        self.bar.finish_and_clear();
        let missing = self.missing.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        if pages_written == total_pages {
            eprintln!("{} {} pages assembled", green("✔"), bold(&pages_written.to_string()));
        } else if pages_written == 0 {
            eprintln!("{} no pages could be assembled", red("✘"));
        } else {
            eprintln!(
                "{} {}/{} pages assembled  ({} missing, {} failed)",
                yellow("⚠"),
                bold(&pages_written.to_string()),
                total_pages,
                missing,
                failed
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Download a 212-page book using a session cookie
  book2pdf https://books.example/ebook/4711 212 --title "Physik 2" \
      --cookie "PHPSESSID=abc123"

  # Point at the viewer page instead of the page directory
  book2pdf --from-viewer https://books.example/ebook/4711/index.html 212

  # Fetch and assemble on one thread, re-encode every image as PNG
  book2pdf --sequential --capture-assets https://books.example/ebook/4711 80

  # Machine-readable summary
  book2pdf --json https://books.example/ebook/4711 212 > run.json

PAGE URLS:
  Each page n is probed at {base}/{n}.svg, then {base}/{n}/{n}.svg. The layout
  that worked last is tried first. After --max-failures pages in a row are
  missing, the book is written with what was found.

EXIT STATUS:
  0  every page was attempted
  1  error (nothing written)
  2  partial book written (too many missing pages, or interrupted)

ENVIRONMENT VARIABLES:
  BOOK2PDF_COOKIE       Cookie header of the logged-in session
  BOOK2PDF_OUTPUT_DIR   Directory for the PDF (default: current directory)
  RUST_LOG              Log filter, e.g. edgequake_book2pdf=debug
"#;

/// Download an SVG-paged e-book and assemble it into one PDF.
#[derive(Parser, Debug)]
#[command(
    name = "book2pdf",
    version,
    about = "Download an SVG-paged e-book and assemble it into one PDF",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Base URL of the book's page documents.
    base_url: String,

    /// Number of pages the book reports.
    pages: usize,

    /// Book title; also names the output file.
    #[arg(long, env = "BOOK2PDF_TITLE", default_value = "book")]
    title: String,

    /// Treat BASE_URL as the viewer page and use its directory.
    #[arg(long)]
    from_viewer: bool,

    /// Raw Cookie header of the authenticated session.
    #[arg(long, env = "BOOK2PDF_COOKIE", hide_env_values = true)]
    cookie: Option<String>,

    /// Extra request header as "Name: value". Repeatable.
    #[arg(long = "header", value_name = "NAME: VALUE")]
    headers: Vec<String>,

    /// Fetch and assemble on one thread instead of overlapping them.
    #[arg(long, env = "BOOK2PDF_SEQUENTIAL")]
    sequential: bool,

    /// Pages fetched ahead of the assembler.
    #[arg(long, env = "BOOK2PDF_QUEUE_DEPTH", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..=64))]
    queue_depth: u32,

    /// Decode every image and store it as PNG.
    #[arg(long, env = "BOOK2PDF_CAPTURE_ASSETS")]
    capture_assets: bool,

    /// Consecutive missing pages before giving up.
    #[arg(long, env = "BOOK2PDF_MAX_FAILURES", default_value_t = 10)]
    max_failures: usize,

    /// Retries per request on transient errors.
    #[arg(long, env = "BOOK2PDF_MAX_RETRIES", default_value_t = 3)]
    retries: u32,

    /// Per-request timeout in seconds.
    #[arg(long, env = "BOOK2PDF_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Directory the PDF is written to.
    #[arg(short, long, env = "BOOK2PDF_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Skip system fonts (text in page SVGs is dropped).
    #[arg(long)]
    no_fonts: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "BOOK2PDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "BOOK2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BOOK2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "BOOK2PDF_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Session ──────────────────────────────────────────────────────────
    let session = if cli.from_viewer {
        BookSession::from_viewer_url(&cli.base_url, cli.pages, cli.title.clone())
    } else {
        BookSession::new(&cli.base_url, cli.pages, cli.title.clone())
    }
    .context("Invalid book")?;

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AcquisitionProgressCallback>)
    } else {
        None
    };
    let stop = StopHandle::new();
    let config = build_config(&cli, progress_cb, stop.clone())?;

    // ── Ctrl-C: finish the current page, then write what we have ─────────
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", yellow("Interrupted; writing the pages fetched so far…"));
            stop.stop();
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let output = download_book(&session, &config)
        .await
        .context("Download failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else if !cli.quiet {
        print_summary(&output, show_progress);
    }

    if !output.outcome.is_complete() {
        std::process::exit(EXIT_PARTIAL);
    }
    Ok(())
}

fn print_summary(output: &BookOutput, show_progress: bool) {
    let stats = &output.stats;
    if !show_progress {
        for err in &output.errors {
            eprintln!("  {} {}", red("✗"), err);
        }
    }
    let mark = match output.outcome {
        RunOutcome::Completed { .. } => green("✔"),
        RunOutcome::AbortedPartial { .. } => yellow("⚠"),
    };
    eprintln!(
        "{}  {}/{} pages  {}ms  →  {}",
        mark,
        stats.pages_written,
        stats.total_pages,
        stats.duration_ms,
        bold(&output.path.display().to_string()),
    );
    eprintln!(
        "   {}",
        dim(&format!(
            "{} missing · {} render failures · {} assets ({} failed) · {} flat / {} nested",
            stats.missing_pages,
            stats.render_failures,
            stats.assets_fetched,
            stats.assets_failed,
            stats.flat_hits,
            stats.nested_hits
        ))
    );
    if let RunOutcome::AbortedPartial { ref reason, .. } = output.outcome {
        eprintln!("   {}", yellow(&format!("stopped early: {reason}")));
    }
}

/// Map CLI args to `AcquisitionConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    stop: StopHandle,
) -> Result<AcquisitionConfig> {
    let schedule = if cli.sequential {
        Schedule::Sequential
    } else {
        Schedule::Staged {
            queue_depth: cli.queue_depth as usize,
        }
    };
    let asset_mode = if cli.capture_assets {
        AssetMode::Capture
    } else {
        AssetMode::Raw
    };

    let mut builder = AcquisitionConfig::builder()
        .schedule(schedule)
        .asset_mode(asset_mode)
        .max_consecutive_failures(cli.max_failures)
        .max_retries(cli.retries)
        .request_timeout_secs(cli.timeout)
        .system_fonts(!cli.no_fonts)
        .stop_handle(stop);

    if let Some(ref cookie) = cli.cookie {
        builder = builder.cookie_header(cookie.clone());
    }
    for raw in &cli.headers {
        let (name, value) = parse_header(raw)?;
        builder = builder.header(name, value);
    }
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--header "Name: value"`.
fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Header '{raw}' must look like 'Name: value'"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Header '{}' has an empty name", raw);
    }
    Ok((name.to_string(), value.trim().to_string()))
}
