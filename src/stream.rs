//! Streaming acquisition API: receive staged pages as they become ready.
//!
//! [`crate::convert::assemble_book`] always ends in a PDF. Callers with their
//! own sink (a different document backend, an archive, a viewer) can take the
//! staged pages directly instead. Pages arrive in book order, each already
//! written to disk with its assets mirrored next to it, followed by one
//! [`StageMessage::End`] carrying the run report.
//!
//! Page files stay readable while the stream is alive. Once it is dropped
//! the producer stops at its next page and removes the staging directory
//! after its last file operation; [`PageStream::close`] waits for that.

use crate::config::{AcquisitionConfig, Schedule};
use crate::error::Book2PdfError;
use crate::fetch::Fetcher;
use crate::output::AcquisitionReport;
use crate::pipeline::acquire::{run_acquisition, AcquisitionContext, Handoff, Staging, StageMessage};
use crate::session::BookSession;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{info, warn};

/// Ordered stream of staged pages, ending with the run report.
pub struct PageStream {
    inner: ReceiverStream<StageMessage>,
    producer: JoinHandle<AcquisitionReport>,
    staging_dir: PathBuf,
}

impl PageStream {
    /// Root of the staging directory holding the page files.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Stop receiving and wait until the producer has finished and the
    /// staging directory is gone.
    ///
    /// Returns the producer's report, or `None` if it panicked.
    pub async fn close(self) -> Option<AcquisitionReport> {
        let Self {
            inner, producer, ..
        } = self;
        drop(inner);
        match producer.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Page producer failed: {}", e);
                None
            }
        }
    }
}

impl Stream for PageStream {
    type Item = StageMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// Start acquiring `session` and return the page stream.
///
/// The channel depth is the staged schedule's `queue_depth` (1 for
/// [`Schedule::Sequential`]); the producer waits while the caller is behind.
///
/// # Example
/// ```rust,no_run
/// use edgequake_book2pdf::{acquire_stream, AcquisitionConfig, BookSession, HttpFetcher, StageMessage};
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = BookSession::new("https://books.example/ebook/4711", 40, "Chemie")?;
/// let config = AcquisitionConfig::default();
/// let fetcher = Arc::new(HttpFetcher::new(&config)?);
/// let mut pages = acquire_stream(&session, fetcher, &config)?;
/// while let Some(msg) = pages.next().await {
///     match msg {
///         StageMessage::Page(p) => println!("page {} at {}", p.page_num(), p.local_path.display()),
///         StageMessage::End(report) => println!("{} missing", report.stats.missing_pages),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn acquire_stream(
    session: &BookSession,
    fetcher: Arc<dyn Fetcher>,
    config: &AcquisitionConfig,
) -> Result<PageStream, Book2PdfError> {
    let depth = match config.schedule {
        Schedule::Sequential => 1,
        Schedule::Staged { queue_depth } => queue_depth.max(1),
    };
    info!(
        "Streaming '{}' ({} pages, queue depth {})",
        session.title(),
        session.page_count(),
        depth
    );

    let staging = Staging::new()?;
    let ctx = AcquisitionContext::new(fetcher, config.clone(), staging.path());
    let (tx, rx) = mpsc::channel(depth);

    let staging_dir = staging.path().to_path_buf();
    let session = session.clone();
    // The task owns the staging directory: it is removed only after the
    // last page write has completed.
    let producer = tokio::spawn(async move {
        let report = run_acquisition(&session, &ctx, Handoff::Channel(tx)).await;
        drop(staging);
        report
    });

    Ok(PageStream {
        inner: ReceiverStream::new(rx),
        producer,
        staging_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AbortReason;
    use crate::fetch::MemoryFetcher;
    use futures::StreamExt;

    const BASE: &str = "https://books.example/s";

    fn svg() -> &'static str {
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="20"/>"#
    }

    #[tokio::test]
    async fn stream_yields_pages_in_order_then_report() {
        let fetcher = MemoryFetcher::new()
            .with(format!("{BASE}/1.svg"), svg())
            .with(format!("{BASE}/3.svg"), svg());
        let session = BookSession::new(BASE, 3, "S").unwrap();
        let config = AcquisitionConfig::builder().system_fonts(false).build().unwrap();

        let mut stream = acquire_stream(&session, Arc::new(fetcher), &config).unwrap();
        let mut pages = Vec::new();
        let mut report = None;
        while let Some(msg) = stream.next().await {
            match msg {
                StageMessage::Page(p) => {
                    assert!(p.local_path.starts_with(stream.staging_dir()));
                    assert!(p.local_path.exists());
                    pages.push(p.page_num());
                }
                StageMessage::End(r) => report = Some(r),
            }
        }
        assert_eq!(pages, vec![1, 3]);
        let report = report.unwrap();
        assert_eq!(report.stats.missing_pages, 1);
        assert!(report.aborted.is_none());
    }

    #[tokio::test]
    async fn closing_the_stream_removes_staging() {
        let fetcher = MemoryFetcher::new().with(format!("{BASE}/1.svg"), svg());
        let session = BookSession::new(BASE, 1, "S").unwrap();
        let config = AcquisitionConfig::builder().system_fonts(false).build().unwrap();

        let stream = acquire_stream(&session, Arc::new(fetcher), &config).unwrap();
        let dir = stream.staging_dir().to_path_buf();
        assert!(dir.exists());
        let report = stream.close().await.unwrap();
        assert!(!dir.exists());
        assert_eq!(report.stats.total_pages, 1);
    }

    #[tokio::test]
    async fn closing_mid_run_stops_the_producer_and_leaves_nothing_behind() {
        let mut fetcher = MemoryFetcher::new();
        for n in 1..=40 {
            fetcher.insert(format!("{BASE}/{n}.svg"), svg());
        }
        let session = BookSession::new(BASE, 40, "S").unwrap();
        let config = AcquisitionConfig::builder()
            .schedule(Schedule::Staged { queue_depth: 1 })
            .system_fonts(false)
            .build()
            .unwrap();

        let mut stream = acquire_stream(&session, Arc::new(fetcher), &config).unwrap();
        let dir = stream.staging_dir().to_path_buf();
        assert!(matches!(stream.next().await, Some(StageMessage::Page(_))));

        let report = stream.close().await.unwrap();
        assert_eq!(report.aborted, Some(AbortReason::ConsumerClosed));
        assert!(report.stats.located_pages < 40);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn dropped_stream_cleans_up_once_the_producer_stops() {
        let fetcher = MemoryFetcher::new().with(format!("{BASE}/1.svg"), svg());
        let session = BookSession::new(BASE, 3, "S").unwrap();
        let config = AcquisitionConfig::builder().system_fonts(false).build().unwrap();

        let stream = acquire_stream(&session, Arc::new(fetcher), &config).unwrap();
        let dir = stream.staging_dir().to_path_buf();
        drop(stream);

        for _ in 0..200 {
            if !dir.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("staging directory {} still present", dir.display());
    }
}
