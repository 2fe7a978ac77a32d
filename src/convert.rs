//! Eager (whole-book) entry points.
//!
//! These functions run the full pipeline and return once the PDF is on disk.
//! Use [`crate::stream::acquire_stream`] instead when you want the staged
//! pages yourself.

use crate::config::{AcquisitionConfig, Schedule};
use crate::error::{AbortReason, Book2PdfError};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::output::{AcquisitionReport, BookOutput, RunOutcome};
use crate::pipeline::acquire::{
    drain_pages, run_acquisition, AcquisitionContext, Handoff, Staging,
};
use crate::pipeline::assemble::PdfAssembler;
use crate::session::BookSession;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Download a book over HTTP and write it as one PDF.
///
/// The HTTP client carries the cookie header, extra headers and user agent
/// from `config`. The file lands at `config.output_dir/{title}.pdf`.
///
/// # Returns
/// `Ok(BookOutput)` whenever at least one page was written, including runs
/// that stopped early (see [`RunOutcome::AbortedPartial`]).
///
/// # Errors
/// - [`Book2PdfError::FatalNoPages`] when no page could be assembled; no
///   file is written.
/// - Environment failures (HTTP client, staging directory, output file).
///
/// # Example
/// ```rust,no_run
/// use edgequake_book2pdf::{download_book, AcquisitionConfig, BookSession};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = BookSession::new("https://books.example/ebook/4711", 212, "Physik 2")?;
/// let config = AcquisitionConfig::builder()
///     .cookie_header("session=abc123")
///     .build()?;
/// let output = download_book(&session, &config).await?;
/// println!("{} pages → {}", output.outcome.pages_written(), output.path.display());
/// # Ok(())
/// # }
/// ```
pub async fn download_book(
    session: &BookSession,
    config: &AcquisitionConfig,
) -> Result<BookOutput, Book2PdfError> {
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config)?);
    assemble_book(session, fetcher, config).await
}

/// Run the pipeline with a caller-supplied fetcher.
///
/// This is the seam for session layers that authenticate differently
/// (browser-harvested clients, replay from disk, tests).
pub async fn assemble_book(
    session: &BookSession,
    fetcher: Arc<dyn Fetcher>,
    config: &AcquisitionConfig,
) -> Result<BookOutput, Book2PdfError> {
    let start = Instant::now();
    let total = session.page_count();
    let path = config.output_dir().join(session.output_file_name());
    info!(
        "Assembling '{}' ({} pages) into {} [{:?}]",
        session.title(),
        total,
        path.display(),
        config.schedule
    );

    // ── Step 1: Staging ──────────────────────────────────────────────────
    // Lives until the PDF is written; removed on every exit path.
    let staging = Staging::new()?;
    let ctx = AcquisitionContext::new(fetcher, config.clone(), staging.path());

    // ── Step 2: Acquire + assemble ───────────────────────────────────────
    let (mut report, written) = match config.schedule {
        Schedule::Sequential => run_sequential(session, &ctx, path.clone()).await?,
        Schedule::Staged { queue_depth } => {
            run_staged(session, ctx, queue_depth, path.clone()).await?
        }
    };
    drop(staging);

    // ── Step 3: Outcome ──────────────────────────────────────────────────
    report.stats.duration_ms = start.elapsed().as_millis() as u64;
    let pages_written = written.as_ref().copied().unwrap_or(0);
    config
        .progress()
        .on_acquisition_complete(total, pages_written);

    let pages_written = written?;
    report.stats.pages_written = pages_written;

    let outcome = match report.aborted.clone() {
        None => RunOutcome::Completed { pages_written },
        Some(reason) => {
            warn!("Partial book: {} pages written ({})", pages_written, reason);
            RunOutcome::AbortedPartial {
                pages_written,
                reason,
            }
        }
    };

    info!(
        "Done: {}/{} pages, {} missing, {}ms",
        pages_written, total, report.stats.missing_pages, report.stats.duration_ms
    );

    Ok(BookOutput {
        outcome,
        path,
        stats: report.stats,
        errors: report.errors,
    })
}

/// Synchronous wrapper around [`download_book`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    session: &BookSession,
    config: &AcquisitionConfig,
) -> Result<BookOutput, Book2PdfError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Book2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(download_book(session, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

type Finished = (AcquisitionReport, Result<usize, Book2PdfError>);

/// Fetch and assemble on one control flow.
async fn run_sequential(
    session: &BookSession,
    ctx: &AcquisitionContext,
    path: PathBuf,
) -> Result<Finished, Book2PdfError> {
    let mut assembler =
        PdfAssembler::new(session.title(), session.page_count(), ctx.config.system_fonts);
    let report = run_acquisition(session, ctx, Handoff::Inline(&mut assembler)).await;

    let written = tokio::task::spawn_blocking(move || assembler.finalize(&path))
        .await
        .map_err(|e| Book2PdfError::Internal(format!("finalize task panicked: {e}")))?;
    Ok((report, written))
}

/// Producer task fetching ahead of a blocking assembler thread.
async fn run_staged(
    session: &BookSession,
    ctx: AcquisitionContext,
    queue_depth: usize,
    path: PathBuf,
) -> Result<Finished, Book2PdfError> {
    let total = session.page_count();
    let title = session.title().to_string();
    let config = ctx.config.clone();
    let (tx, rx) = mpsc::channel(queue_depth.max(1));

    let producer = {
        let session = session.clone();
        tokio::spawn(async move { run_acquisition(&session, &ctx, Handoff::Channel(tx)).await })
    };

    let consumer = tokio::task::spawn_blocking(move || {
        let mut assembler = PdfAssembler::new(title, total, config.system_fonts);
        let drained = drain_pages(rx, &mut assembler, total, config.progress());
        // Finalize only once the stream has ended, sentinel or not.
        let written = assembler.finalize(&path);
        (drained, written)
    });

    let (drained, written) = consumer
        .await
        .map_err(|e| Book2PdfError::Internal(format!("assembler thread panicked: {e}")))?;

    if let Err(e) = producer.await {
        error!("Page producer failed: {}", e);
    }

    let mut report = drained.report.unwrap_or_else(|| {
        let mut r = AcquisitionReport::new(total);
        r.aborted = Some(AbortReason::ProducerLost);
        r
    });
    report.stats.render_failures += drained.render_failures;
    report.merge_errors(drained.errors);
    Ok((report, written))
}
