//! Error types for the edgequake-book2pdf library.
//!
//! Three layers of failure, each with its own type:
//!
//! * [`Book2PdfError`] — **Fatal**: the run cannot produce a document at all
//!   (invalid session, staging directory unavailable, output not writable,
//!   or not a single page rendered). Returned as `Err` from the top-level
//!   `download*` functions.
//!
//! * [`PageError`] — **Non-fatal**: one page or one asset failed. Collected
//!   in [`crate::output::AcquisitionReport`] so callers can inspect a partial
//!   book instead of losing it to one missing page.
//!
//! * [`FetchError`] — a transport-level failure from a [`crate::fetch::Fetcher`]
//!   after its retry budget is spent. A clean non-success status is *not* an
//!   error; it is [`crate::fetch::FetchOutcome::Missing`].
//!
//! Early termination that still produces output (failure streak, user stop)
//! is neither of these: see [`AbortReason`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-book2pdf library.
#[derive(Debug, Error)]
pub enum Book2PdfError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The book session handed over by the auth layer is unusable.
    #[error("Invalid book session: {0}")]
    InvalidSession(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be constructed (bad header value, TLS init).
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    // ── Outcome errors ────────────────────────────────────────────────────
    /// Not a single page was rendered; refusing to write an empty PDF.
    #[error("No pages could be assembled out of {total}; no output written")]
    FatalNoPages { total: usize },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the per-run staging directory.
    #[error("Failed to create staging directory: {source}")]
    StagingUnavailable {
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panicked, runtime unavailable).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page or asset.
///
/// Page numbers are 1-indexed, matching what a reader sees in the book.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum PageError {
    /// Neither URL pattern served the page's SVG document.
    #[error("Page {page}: not found (tried {})", tried.join(", "))]
    PageNotFound { page: usize, tried: Vec<String> },

    /// One embedded image could not be retrieved; the page proceeds without it.
    #[error("Page {page}: asset '{href}' unavailable: {detail}")]
    AssetFetchFailed {
        page: usize,
        href: String,
        detail: String,
    },

    /// The page SVG could not be parsed or drawn; the page is left out.
    #[error("Page {page}: render failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Writing the page into the staging directory failed.
    #[error("Page {page}: staging failed: {detail}")]
    StagingFailed { page: usize, detail: String },

    /// A page arrived at the assembler at or below the last committed page.
    #[error("Page {page}: out of order (last committed page {last})")]
    OutOfOrder { page: usize, last: usize },
}

impl PageError {
    /// 1-indexed page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::PageNotFound { page, .. }
            | PageError::AssetFetchFailed { page, .. }
            | PageError::RenderFailed { page, .. }
            | PageError::StagingFailed { page, .. }
            | PageError::OutOfOrder { page, .. } => *page,
        }
    }
}

/// Why acquisition stopped before reaching the last page.
///
/// Every variant still leads to a finalized (partial) document as long as at
/// least one page was assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// `consecutive` pages in a row were not found under either URL pattern.
    TooManyFailures { consecutive: usize, threshold: usize },
    /// The caller raised the [`crate::config::StopHandle`].
    Stopped,
    /// The assembling stage went away before the producer finished.
    ConsumerClosed,
    /// The fetching stage ended without sending its final report.
    ProducerLost,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::TooManyFailures {
                consecutive,
                threshold,
            } => write!(
                f,
                "too many failures: {consecutive} consecutive pages missing (threshold {threshold})"
            ),
            AbortReason::Stopped => f.write_str("stopped by caller"),
            AbortReason::ConsumerClosed => f.write_str("assembler stage closed early"),
            AbortReason::ProducerLost => f.write_str("page producer ended without a report"),
        }
    }
}

/// A fetch that failed below the HTTP-status level, after retries.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Connection, DNS, TLS or body-read failure.
    #[error("Request to '{url}' failed: {detail}")]
    Transport { url: String, detail: String },

    /// The request exceeded the configured timeout.
    #[error("Request to '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// The server kept answering with a retryable status (429 / 5xx).
    #[error("Server returned HTTP {status} for '{url}' after all retries")]
    Status { url: String, status: u16 },

    /// The fetched asset could not be decoded and re-captured as an image.
    #[error("Could not capture image from '{url}': {detail}")]
    Capture { url: String, detail: String },
}
