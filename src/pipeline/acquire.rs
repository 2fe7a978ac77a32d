//! The page loop: locate → stage → resolve assets → hand off, for every page.
//!
//! [`run_acquisition`] walks page indices strictly in order and never revisits
//! one. What happens to a finished page depends on the [`Handoff`]:
//!
//! * [`Handoff::Inline`] appends it to a [`PdfAssembler`] right away
//!   (sequential schedule);
//! * [`Handoff::Channel`] pushes it into a bounded channel drained by a
//!   blocking assembler thread (staged schedule), and closes the stream with
//!   [`StageMessage::End`].
//!
//! ## Failure budget
//!
//! A page missing under both URL layouts is skipped. Books often report more
//! pages than the server hosts, so `max_consecutive_failures` misses in a row
//! end the run early as [`AbortReason::TooManyFailures`]. The streak resets on
//! every page that is found. Staging and render failures skip the page but do
//! not count toward the streak.

use super::assemble::PdfAssembler;
use super::assets::{AssetReference, AssetResolver};
use super::locate::{Located, PageLocator, UrlPattern};
use crate::config::AcquisitionConfig;
use crate::error::{AbortReason, Book2PdfError, PageError};
use crate::fetch::{asset_fetcher, Fetcher};
use crate::output::AcquisitionReport;
use crate::progress::AcquisitionProgressCallback;
use crate::session::BookSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// A page ready for assembly.
///
/// Owned by exactly one stage at a time; moved through the hand-off.
#[derive(Debug, Clone)]
pub struct PageDescriptor {
    /// 0-based position in the book.
    pub index: usize,
    /// URL the page document was served from.
    pub source_url: String,
    /// Layout the document was found under, if it was fetched.
    pub pattern: Option<UrlPattern>,
    /// Resolved SVG text. When `None` the assembler reads `local_path`.
    pub local_content: Option<String>,
    /// Staged `.svg` file.
    pub local_path: PathBuf,
    /// Directory holding the page and its mirrored assets.
    pub page_dir: PathBuf,
    pub assets: Vec<AssetReference>,
    pub asset_failures: Vec<PageError>,
}

impl PageDescriptor {
    /// 1-based page number.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }

    /// A page whose SVG text is already in memory.
    pub fn inline(index: usize, content: impl Into<String>, page_dir: &Path) -> Self {
        Self {
            index,
            source_url: String::new(),
            pattern: None,
            local_content: Some(content.into()),
            local_path: page_dir.join(format!("{}.svg", index + 1)),
            page_dir: page_dir.to_path_buf(),
            assets: Vec::new(),
            asset_failures: Vec::new(),
        }
    }
}

/// What travels from the fetching stage to the assembling stage.
#[derive(Debug)]
pub enum StageMessage {
    Page(PageDescriptor),
    /// Last message of every run, early aborts included.
    End(AcquisitionReport),
}

/// Where [`run_acquisition`] delivers finished pages.
pub enum Handoff<'a> {
    /// Append on the same control flow.
    Inline(&'a mut PdfAssembler),
    /// Send to a consumer on another thread.
    Channel(mpsc::Sender<StageMessage>),
}

// ── Staging ──────────────────────────────────────────────────────────────

/// Per-run scratch directory, removed on drop.
#[derive(Debug)]
pub struct Staging {
    dir: TempDir,
}

impl Staging {
    pub fn new() -> Result<Self, Book2PdfError> {
        let dir = tempfile::Builder::new()
            .prefix("book2pdf-")
            .tempdir()
            .map_err(|source| Book2PdfError::StagingUnavailable { source })?;
        debug!("Staging directory: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// `{root}/page-{nnnn}` for the page at `index`.
pub fn page_dir(root: &Path, index: usize) -> PathBuf {
    root.join(format!("page-{:04}", index + 1))
}

// ── Context ──────────────────────────────────────────────────────────────

/// Everything the page loop needs besides the session.
#[derive(Clone)]
pub struct AcquisitionContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub resolver: AssetResolver,
    pub staging_root: PathBuf,
    pub config: AcquisitionConfig,
}

impl AcquisitionContext {
    /// Page documents go through `fetcher`; assets through the fetcher
    /// selected by `config.asset_mode`.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        config: AcquisitionConfig,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        let assets = asset_fetcher(Arc::clone(&fetcher), config.asset_mode);
        debug!(
            "Pages via {} fetcher, assets via {} fetcher",
            fetcher.name(),
            assets.name()
        );
        let resolver = AssetResolver::new(assets);
        Self {
            fetcher,
            resolver,
            staging_root: staging_root.into(),
            config,
        }
    }
}

// ── Page loop ────────────────────────────────────────────────────────────

/// Acquire every page of `session` in order and deliver it to `handoff`.
///
/// Per-page problems are collected in the returned report and never stop the
/// loop; only the failure streak, the stop handle and a vanished consumer
/// end it early. With [`Handoff::Channel`] the report is also sent as the
/// final [`StageMessage::End`].
pub async fn run_acquisition(
    session: &BookSession,
    ctx: &AcquisitionContext,
    mut handoff: Handoff<'_>,
) -> AcquisitionReport {
    let total = session.page_count();
    let threshold = ctx.config.max_consecutive_failures;
    let cb = ctx.config.progress();
    let mut report = AcquisitionReport::new(total);
    let mut locator = PageLocator::new(session.base());
    let mut streak = 0usize;

    info!("Acquiring {} pages from {}", total, session.base());
    cb.on_acquisition_start(total);

    for index in 0..total {
        if ctx.config.stop.is_stopped() {
            info!("Stop requested before page {}", index + 1);
            report.aborted = Some(AbortReason::Stopped);
            break;
        }
        if matches!(handoff, Handoff::Channel(ref tx) if tx.is_closed()) {
            info!("Page receiver gone before page {}", index + 1);
            report.aborted = Some(AbortReason::ConsumerClosed);
            break;
        }
        let page_num = index + 1;

        let located = match locator.locate(ctx.fetcher.as_ref(), index, total).await {
            Ok(located) => {
                streak = 0;
                located
            }
            Err(err) => {
                streak += 1;
                report.stats.missing_pages += 1;
                warn!("{}", err);
                cb.on_page_missing(page_num, total);
                report.errors.push(err);
                if streak >= threshold {
                    warn!(
                        "{} consecutive pages missing, giving up after page {}",
                        streak, page_num
                    );
                    report.aborted = Some(AbortReason::TooManyFailures {
                        consecutive: streak,
                        threshold,
                    });
                    break;
                }
                continue;
            }
        };

        report.stats.located_pages += 1;
        match located.pattern {
            UrlPattern::Flat => report.stats.flat_hits += 1,
            UrlPattern::Nested => report.stats.nested_hits += 1,
        }
        cb.on_page_located(page_num, total, located.url.as_str());

        let page = match stage_page(ctx, index, located).await {
            Ok(page) => page,
            Err(err) => {
                warn!("{}", err);
                if matches!(err, PageError::RenderFailed { .. }) {
                    report.stats.render_failures += 1;
                }
                cb.on_page_error(page_num, total, &err.to_string());
                cb.on_page_skipped(page_num, total);
                report.errors.push(err);
                continue;
            }
        };

        report.stats.assets_fetched += page.assets.len();
        report.stats.assets_failed += page.asset_failures.len();
        for failure in &page.asset_failures {
            cb.on_page_error(page_num, total, &failure.to_string());
        }
        report.errors.extend(page.asset_failures.iter().cloned());

        match handoff {
            Handoff::Inline(ref mut assembler) => {
                match commit_page(assembler, &page, total, cb) {
                    Ok(()) => report.stats.pages_written += 1,
                    Err(err) => {
                        if matches!(err, PageError::RenderFailed { .. }) {
                            report.stats.render_failures += 1;
                        }
                        report.errors.push(err);
                    }
                }
            }
            Handoff::Channel(ref tx) => {
                if tx.send(StageMessage::Page(page)).await.is_err() {
                    warn!("Assembler stage closed; stopping at page {}", page_num);
                    report.aborted = Some(AbortReason::ConsumerClosed);
                    break;
                }
            }
        }
    }

    if let Handoff::Channel(tx) = handoff {
        // The consumer may already be gone; the report is returned anyway.
        let _ = tx.send(StageMessage::End(report.clone())).await;
    }

    info!(
        "Acquisition finished: {} located, {} missing{}",
        report.stats.located_pages,
        report.stats.missing_pages,
        report
            .aborted
            .as_ref()
            .map(|r| format!(" (stopped early: {r})"))
            .unwrap_or_default()
    );
    report
}

/// Write the page document, resolve its assets and write the result.
async fn stage_page(
    ctx: &AcquisitionContext,
    index: usize,
    located: Located,
) -> Result<PageDescriptor, PageError> {
    let page = index + 1;
    let staging_failed = |detail: String| PageError::StagingFailed { page, detail };

    let dir = page_dir(&ctx.staging_root, index);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| staging_failed(format!("cannot create {}: {e}", dir.display())))?;

    let text = String::from_utf8(located.bytes).map_err(|e| PageError::RenderFailed {
        page,
        detail: format!("page document is not UTF-8: {e}"),
    })?;

    let local_path = dir.join(format!("{page}.svg"));
    tokio::fs::write(&local_path, &text)
        .await
        .map_err(|e| staging_failed(format!("cannot write {}: {e}", local_path.display())))?;

    let resolved = ctx.resolver.resolve(page, &text, &located.url, &dir).await;
    if resolved.content != text {
        tokio::fs::write(&local_path, &resolved.content)
            .await
            .map_err(|e| staging_failed(format!("cannot write {}: {e}", local_path.display())))?;
    }

    Ok(PageDescriptor {
        index,
        source_url: located.url.to_string(),
        pattern: Some(located.pattern),
        local_content: Some(resolved.content),
        local_path,
        page_dir: dir,
        assets: resolved.assets,
        asset_failures: resolved.failures,
    })
}

/// Append one page, reporting the result to the progress callback.
pub(crate) fn commit_page(
    assembler: &mut PdfAssembler,
    page: &PageDescriptor,
    total: usize,
    cb: &dyn AcquisitionProgressCallback,
) -> Result<(), PageError> {
    match assembler.append(page) {
        Ok(()) => {
            cb.on_page_assembled(page.page_num(), total);
            Ok(())
        }
        Err(err) => {
            warn!("{}", err);
            cb.on_page_error(page.page_num(), total, &err.to_string());
            cb.on_page_skipped(page.page_num(), total);
            Err(err)
        }
    }
}

// ── Consumer ─────────────────────────────────────────────────────────────

/// What the assembling side saw while draining the channel.
#[derive(Debug, Default)]
pub(crate) struct Drained {
    /// The producer's report; `None` if the channel closed without one.
    pub report: Option<AcquisitionReport>,
    pub errors: Vec<PageError>,
    pub render_failures: usize,
}

/// Append every page from `rx` until the end sentinel or channel close.
///
/// Blocks the current thread; call from `spawn_blocking`.
pub(crate) fn drain_pages(
    rx: mpsc::Receiver<StageMessage>,
    assembler: &mut PdfAssembler,
    total: usize,
    cb: &dyn AcquisitionProgressCallback,
) -> Drained {
    let mut drained = Drained::default();
    for message in futures::executor::block_on_stream(ReceiverStream::new(rx)) {
        match message {
            StageMessage::Page(page) => {
                if let Err(err) = commit_page(assembler, &page, total, cb) {
                    if matches!(err, PageError::RenderFailed { .. }) {
                        drained.render_failures += 1;
                    }
                    drained.errors.push(err);
                }
            }
            StageMessage::End(report) => {
                drained.report = Some(report);
                break;
            }
        }
    }
    if drained.report.is_none() {
        warn!("Page channel closed without an end marker");
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Schedule;
    use crate::fetch::MemoryFetcher;

    const BASE: &str = "https://books.example/b";

    fn svg(n: usize) -> String {
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="{}"><rect width="10" height="10"/></svg>"#,
            100 + n
        )
    }

    fn context(fetcher: MemoryFetcher, root: &Path, threshold: usize) -> AcquisitionContext {
        let config = AcquisitionConfig::builder()
            .schedule(Schedule::Sequential)
            .max_consecutive_failures(threshold)
            .system_fonts(false)
            .build()
            .unwrap();
        AcquisitionContext::new(Arc::new(fetcher), config, root)
    }

    #[tokio::test]
    async fn inline_handoff_appends_found_pages_and_skips_missing() {
        let root = TempDir::new().unwrap();
        let fetcher = MemoryFetcher::new()
            .with(format!("{BASE}/1.svg"), svg(1))
            .with(format!("{BASE}/2.svg"), svg(2))
            .with(format!("{BASE}/4.svg"), svg(4));
        let ctx = context(fetcher, root.path(), 10);
        let session = BookSession::new(BASE, 4, "T").unwrap();
        let mut asm = PdfAssembler::new("T", 4, false);

        let report = run_acquisition(&session, &ctx, Handoff::Inline(&mut asm)).await;
        assert_eq!(asm.page_count(), 3);
        assert_eq!(report.stats.pages_written, 3);
        assert_eq!(report.stats.missing_pages, 1);
        assert!(report.aborted.is_none());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].page(), 3);
        assert!(page_dir(root.path(), 0).join("1.svg").exists());
    }

    #[tokio::test]
    async fn streak_aborts_at_threshold() {
        let root = TempDir::new().unwrap();
        let fetcher = MemoryFetcher::new().with(format!("{BASE}/1.svg"), svg(1));
        let ctx = context(fetcher, root.path(), 3);
        let session = BookSession::new(BASE, 10, "T").unwrap();
        let mut asm = PdfAssembler::new("T", 10, false);

        let report = run_acquisition(&session, &ctx, Handoff::Inline(&mut asm)).await;
        assert_eq!(
            report.aborted,
            Some(AbortReason::TooManyFailures {
                consecutive: 3,
                threshold: 3
            })
        );
        assert_eq!(report.stats.missing_pages, 3);
        assert_eq!(asm.page_count(), 1);
    }

    #[tokio::test]
    async fn stop_handle_is_checked_before_each_page() {
        let root = TempDir::new().unwrap();
        let ctx = context(MemoryFetcher::new(), root.path(), 10);
        ctx.config.stop.stop();
        let session = BookSession::new(BASE, 5, "T").unwrap();
        let mut asm = PdfAssembler::new("T", 5, false);

        let report = run_acquisition(&session, &ctx, Handoff::Inline(&mut asm)).await;
        assert_eq!(report.aborted, Some(AbortReason::Stopped));
        assert_eq!(report.stats.located_pages + report.stats.missing_pages, 0);
    }

    #[tokio::test]
    async fn channel_handoff_ends_with_sentinel() {
        let root = TempDir::new().unwrap();
        let fetcher = MemoryFetcher::new()
            .with(format!("{BASE}/1.svg"), svg(1))
            .with(format!("{BASE}/2/2.svg"), svg(2));
        let ctx = context(fetcher, root.path(), 10);
        let session = BookSession::new(BASE, 2, "T").unwrap();
        let (tx, mut rx) = mpsc::channel(8);

        let report = run_acquisition(&session, &ctx, Handoff::Channel(tx)).await;
        assert_eq!(report.stats.flat_hits, 1);
        assert_eq!(report.stats.nested_hits, 1);

        let mut indices = Vec::new();
        let mut ended = false;
        while let Some(msg) = rx.recv().await {
            match msg {
                StageMessage::Page(p) => indices.push(p.index),
                StageMessage::End(r) => {
                    assert_eq!(r.stats.located_pages, 2);
                    ended = true;
                }
            }
        }
        assert_eq!(indices, vec![0, 1]);
        assert!(ended);
    }

    #[tokio::test]
    async fn closed_channel_stops_the_run() {
        let root = TempDir::new().unwrap();
        let fetcher = MemoryFetcher::new()
            .with(format!("{BASE}/1.svg"), svg(1))
            .with(format!("{BASE}/2.svg"), svg(2));
        let ctx = context(fetcher, root.path(), 10);
        let session = BookSession::new(BASE, 2, "T").unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let report = run_acquisition(&session, &ctx, Handoff::Channel(tx)).await;
        assert_eq!(report.aborted, Some(AbortReason::ConsumerClosed));
        assert_eq!(report.stats.located_pages, 0);
        assert!(std::fs::read_dir(root.path()).unwrap().next().is_none());
    }

    #[test]
    fn drain_without_sentinel_reports_none() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(StageMessage::Page(PageDescriptor::inline(0, svg(1), dir.path())))
            .unwrap();
        tx.try_send(StageMessage::Page(PageDescriptor::inline(1, "<svg", dir.path())))
            .unwrap();
        drop(tx);

        let mut asm = PdfAssembler::new("T", 2, false);
        let drained = drain_pages(rx, &mut asm, 2, &crate::progress::NoopProgressCallback);
        assert!(drained.report.is_none());
        assert_eq!(drained.render_failures, 1);
        assert_eq!(asm.page_count(), 1);
    }

    #[test]
    fn page_dirs_are_zero_padded() {
        let root = Path::new("/tmp/stage");
        assert_eq!(page_dir(root, 0), root.join("page-0001"));
        assert_eq!(page_dir(root, 122), root.join("page-0123"));
    }
}
