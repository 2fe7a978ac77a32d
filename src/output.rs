//! Result types returned by the acquisition and assembly entry points.

use crate::error::{AbortReason, PageError};
use serde::Serialize;
use std::path::PathBuf;

/// Counters collected over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AcquisitionStats {
    /// Page count reported by the session.
    pub total_pages: usize,
    /// Pages whose SVG document was found under either URL pattern.
    pub located_pages: usize,
    /// Pages that were not found under either pattern.
    pub missing_pages: usize,
    pub assets_fetched: usize,
    pub assets_failed: usize,
    /// Pages the PDF backend rejected.
    pub render_failures: usize,
    /// Pages committed to the output document.
    pub pages_written: usize,
    /// Pages served as `{base}/{n}.svg`.
    pub flat_hits: usize,
    /// Pages served as `{base}/{n}/{n}.svg`.
    pub nested_hits: usize,
    /// Wall-clock time of the whole run in milliseconds.
    pub duration_ms: u64,
}

/// What the fetching side hands over when it is done.
///
/// Sent as the end-of-stream sentinel in the staged schedule, returned
/// directly in the sequential one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AcquisitionReport {
    /// `Some` when iteration stopped before the last page.
    pub aborted: Option<AbortReason>,
    /// Non-fatal errors in the order they happened.
    pub errors: Vec<PageError>,
    pub stats: AcquisitionStats,
}

impl AcquisitionReport {
    pub fn new(total_pages: usize) -> Self {
        Self {
            aborted: None,
            errors: Vec::new(),
            stats: AcquisitionStats {
                total_pages,
                ..Default::default()
            },
        }
    }

    /// Fold assembler-side errors into the report.
    pub(crate) fn merge_errors(&mut self, more: Vec<PageError>) {
        self.errors.extend(more);
        self.errors.sort_by_key(PageError::page);
    }
}

/// How a run that produced a document ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every page index was attempted.
    Completed { pages_written: usize },
    /// Iteration stopped early; the pages gathered so far were written.
    AbortedPartial {
        pages_written: usize,
        reason: AbortReason,
    },
}

impl RunOutcome {
    pub fn pages_written(&self) -> usize {
        match self {
            RunOutcome::Completed { pages_written }
            | RunOutcome::AbortedPartial { pages_written, .. } => *pages_written,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

/// A finished book.
#[derive(Debug, Clone, Serialize)]
pub struct BookOutput {
    pub outcome: RunOutcome,
    /// Path of the written PDF.
    pub path: PathBuf,
    pub stats: AcquisitionStats,
    /// Every non-fatal page and asset error, ordered by page.
    pub errors: Vec<PageError>,
}
