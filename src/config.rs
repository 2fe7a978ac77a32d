//! Configuration types for book acquisition and assembly.
//!
//! All pipeline behaviour is controlled through [`AcquisitionConfig`], built
//! via its [`AcquisitionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to clone into the producer task, log at startup, and diff two
//! runs to understand why their outputs differ.

use crate::error::Book2PdfError;
use crate::progress::{AcquisitionProgressCallback, NoopProgressCallback, ProgressCallback};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default user agent sent with every page and asset request.
pub const DEFAULT_USER_AGENT: &str = concat!("edgequake-book2pdf/", env!("CARGO_PKG_VERSION"));

/// Configuration for one book download.
///
/// Built via [`AcquisitionConfig::builder()`] or using
/// [`AcquisitionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_book2pdf::{AcquisitionConfig, Schedule};
///
/// let config = AcquisitionConfig::builder()
///     .schedule(Schedule::Sequential)
///     .max_consecutive_failures(5)
///     .cookie_header("session=abc123")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AcquisitionConfig {
    /// How fetching and assembling are scheduled. Default: staged, depth 4.
    pub schedule: Schedule,

    /// How embedded raster assets are stored. Default: [`AssetMode::Raw`].
    pub asset_mode: AssetMode,

    /// Consecutive missing pages after which acquisition stops. Default: 10.
    ///
    /// Books often report a page count slightly larger than what the server
    /// actually hosts. Without a cut-off a 400-page count on a 40-page book
    /// would issue 720 useless probes.
    pub max_consecutive_failures: usize,

    /// Maximum retry attempts on a transient fetch failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Per-request timeout in seconds. Default: 30.
    pub request_timeout_secs: u64,

    /// `User-Agent` header. Default: [`DEFAULT_USER_AGENT`].
    pub user_agent: String,

    /// Raw `Cookie` header carrying the authenticated session.
    pub cookie_header: Option<String>,

    /// Additional request headers (name, value) supplied by the auth layer.
    pub extra_headers: Vec<(String, String)>,

    /// Directory the finished PDF is written to. Default: current directory.
    pub output_dir: Option<PathBuf>,

    /// Load system fonts so `<text>` in page SVGs is converted to outlines.
    /// Default: true.
    pub system_fonts: bool,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,

    /// Coarse cancellation: checked once before each page.
    pub stop: StopHandle,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            schedule: Schedule::default(),
            asset_mode: AssetMode::default(),
            max_consecutive_failures: 10,
            max_retries: 3,
            retry_backoff_ms: 500,
            request_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cookie_header: None,
            extra_headers: Vec::new(),
            output_dir: None,
            system_fonts: true,
            progress_callback: None,
            stop: StopHandle::default(),
        }
    }
}

impl fmt::Debug for AcquisitionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionConfig")
            .field("schedule", &self.schedule)
            .field("asset_mode", &self.asset_mode)
            .field("max_consecutive_failures", &self.max_consecutive_failures)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("cookie_header", &self.cookie_header.as_ref().map(|_| "<redacted>"))
            .field(
                "extra_headers",
                &self.extra_headers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .field("output_dir", &self.output_dir)
            .field("system_fonts", &self.system_fonts)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn AcquisitionProgressCallback>"),
            )
            .field("stop", &self.stop.is_stopped())
            .finish()
    }
}

impl AcquisitionConfig {
    /// Create a new builder for `AcquisitionConfig`.
    pub fn builder() -> AcquisitionConfigBuilder {
        AcquisitionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The configured progress callback, or a no-op one.
    pub(crate) fn progress(&self) -> &dyn AcquisitionProgressCallback {
        match self.progress_callback {
            Some(ref cb) => cb.as_ref(),
            None => &NoopProgressCallback,
        }
    }

    /// Directory the output PDF lands in.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Builder for [`AcquisitionConfig`].
#[derive(Debug)]
pub struct AcquisitionConfigBuilder {
    config: AcquisitionConfig,
}

impl AcquisitionConfigBuilder {
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.config.schedule = match schedule {
            Schedule::Staged { queue_depth } => Schedule::Staged {
                queue_depth: queue_depth.max(1),
            },
            s => s,
        };
        self
    }

    pub fn asset_mode(mut self, mode: AssetMode) -> Self {
        self.config.asset_mode = mode;
        self
    }

    pub fn max_consecutive_failures(mut self, n: usize) -> Self {
        self.config.max_consecutive_failures = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(10);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn cookie_header(mut self, cookie: impl Into<String>) -> Self {
        self.config.cookie_header = Some(cookie.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn system_fonts(mut self, v: bool) -> Self {
        self.config.system_fonts = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn stop_handle(mut self, stop: StopHandle) -> Self {
        self.config.stop = stop;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AcquisitionConfig, Book2PdfError> {
        let c = &self.config;
        if c.request_timeout_secs == 0 {
            return Err(Book2PdfError::InvalidConfig(
                "Request timeout must be ≥ 1 second".into(),
            ));
        }
        if c.user_agent.trim().is_empty() {
            return Err(Book2PdfError::InvalidConfig(
                "User agent must not be empty".into(),
            ));
        }
        if let Some((name, _)) = c.extra_headers.iter().find(|(k, _)| k.trim().is_empty()) {
            return Err(Book2PdfError::InvalidConfig(format!(
                "Header name must not be empty (got {name:?})"
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the fetching stage and the assembling stage are scheduled.
///
/// | Schedule | Behaviour |
/// |----------|-----------|
/// | `Sequential` | fetch page N, render page N, fetch page N+1, … on one task |
/// | `Staged` | a producer task fetches ahead while a blocking thread renders |
///
/// Both produce identical documents; `Staged` overlaps network latency with
/// PDF conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    /// Single control flow, no concurrency.
    Sequential,
    /// Producer/consumer with a bounded FIFO hand-off of `queue_depth` pages.
    Staged { queue_depth: usize },
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Staged { queue_depth: 4 }
    }
}

/// How embedded raster assets are materialized in the staging directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssetMode {
    /// Write the fetched bytes verbatim. (default)
    #[default]
    Raw,
    /// Decode the fetched image and re-capture it as PNG.
    ///
    /// Use when the service serves formats the PDF backend cannot embed
    /// (e.g. WebP) or mislabelled payloads.
    Capture,
}

/// Cooperative "stop after the current page" flag.
///
/// Cloning shares the flag; raising it on any clone stops the run.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the pipeline to stop before starting the next page.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
