//! Progress-callback trait for per-page acquisition events.
//!
//! Inject an [`Arc<dyn AcquisitionProgressCallback>`] via
//! [`crate::config::AcquisitionConfigBuilder::progress_callback`] to receive
//! events as the pipeline locates, skips and assembles each page.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a terminal progress bar, a log file, or a GUI without the
//! library knowing how the host application communicates. In the staged
//! schedule the fetching and assembling events come from different threads,
//! so the trait is `Send + Sync`.
//!
//! # Example
//!
//! ```rust
//! use edgequake_book2pdf::{AcquisitionProgressCallback, AcquisitionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     assembled: AtomicUsize,
//! }
//!
//! impl AcquisitionProgressCallback for CountingCallback {
//!     fn on_page_assembled(&self, page_num: usize, total_pages: usize) {
//!         let done = self.assembled.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("Page {}/{} assembled ({} so far)", page_num, total_pages, done);
//!     }
//! }
//!
//! let config = AcquisitionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { assembled: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Page numbers are 1-indexed.
///
/// # Thread safety
///
/// With [`crate::config::Schedule::Staged`], `on_page_located` /
/// `on_page_missing` fire on the producer task while `on_page_assembled`
/// fires on the assembling thread, possibly at the same time.
pub trait AcquisitionProgressCallback: Send + Sync {
    /// Called once before the first page is probed.
    fn on_acquisition_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page's SVG document was found.
    fn on_page_located(&self, page_num: usize, total_pages: usize, url: &str) {
        let _ = (page_num, total_pages, url);
    }

    /// Called when neither URL pattern served the page.
    fn on_page_missing(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been committed to the output document.
    fn on_page_assembled(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called for any other non-fatal page or asset error.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called when a located page will not appear in the document because
    /// staging or rendering it failed. The cause went to `on_page_error`.
    ///
    /// Every page ends in exactly one of `on_page_missing`,
    /// `on_page_assembled` or `on_page_skipped`, unless the run stops early.
    fn on_page_skipped(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called once after acquisition ended (normally or early).
    ///
    /// # Arguments
    /// * `total_pages`   — page count reported by the session
    /// * `pages_written` — pages committed to the output document
    fn on_acquisition_complete(&self, total_pages: usize, pages_written: usize) {
        let _ = (total_pages, pages_written);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AcquisitionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AcquisitionConfig`].
pub type ProgressCallback = Arc<dyn AcquisitionProgressCallback>;
