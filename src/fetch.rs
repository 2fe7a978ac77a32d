//! Fetch capability: turn a URL into bytes or a clean "not there" signal.
//!
//! The pipeline never talks to `reqwest` directly. It holds an
//! `Arc<dyn Fetcher>` so the session layer can hand over whatever carries the
//! authenticated session: the bundled [`HttpFetcher`] (cookie header, extra
//! headers), a custom implementation, or [`MemoryFetcher`] for offline
//! replay and tests.
//!
//! ## Found / Missing / Error
//!
//! A non-success HTTP status is an *answer*, not a failure: the page locator
//! relies on a 404 to move on to the second URL pattern. It is therefore
//! reported as [`FetchOutcome::Missing`]. Only transport problems that
//! survive the retry budget become a [`FetchError`].
//!
//! ## Retry Strategy
//!
//! Timeouts, connection errors, HTTP 429 and 5xx are retried with exponential
//! backoff (`retry_backoff_ms * 2^attempt`). With 500 ms base and 3 retries
//! the wait sequence is 500 ms → 1 s → 2 s. Other 4xx answers return
//! immediately.

use crate::config::{AcquisitionConfig, AssetMode};
use crate::error::{Book2PdfError, FetchError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{StatusCode, Url};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Result of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The server answered with a success status and this body.
    Found(Vec<u8>),
    /// The server answered, but not with a success status.
    Missing { status: u16 },
}

impl FetchOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, FetchOutcome::Found(_))
    }
}

/// Anything that can fetch a URL on behalf of the authenticated session.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "fetcher"
    }
}

// ── HTTP ─────────────────────────────────────────────────────────────────

/// Plain HTTP fetcher with bounded retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

impl HttpFetcher {
    /// Build a client carrying the session's cookie, headers and user agent.
    pub fn new(config: &AcquisitionConfig) -> Result<Self, Book2PdfError> {
        let mut headers = HeaderMap::new();
        if let Some(ref cookie) = config.cookie_header {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| Book2PdfError::HttpClient(format!("invalid cookie header: {e}")))?;
            headers.insert(COOKIE, value);
        }
        for (name, value) in &config.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Book2PdfError::HttpClient(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Book2PdfError::HttpClient(format!("invalid value for {name}: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| Book2PdfError::HttpClient(e.to_string()))?;

        Ok(Self::with_client(client, config))
    }

    /// Wrap a client the session layer already configured (cookie jar etc.).
    pub fn with_client(client: reqwest::Client, config: &AcquisitionConfig) -> Self {
        Self {
            client,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.request_timeout_secs,
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError> {
        let mut last_err: Option<FetchError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    url, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let response = match self.client.get(url.clone()).send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    last_err = Some(FetchError::Timeout {
                        url: url.to_string(),
                        secs: self.timeout_secs,
                    });
                    continue;
                }
                Err(e) => {
                    last_err = Some(FetchError::Transport {
                        url: url.to_string(),
                        detail: e.to_string(),
                    });
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                match response.bytes().await {
                    Ok(body) => {
                        debug!("{} → {} bytes", url, body.len());
                        return Ok(FetchOutcome::Found(body.to_vec()));
                    }
                    Err(e) => {
                        last_err = Some(FetchError::Transport {
                            url: url.to_string(),
                            detail: e.to_string(),
                        });
                    }
                }
            } else if is_retryable(status) {
                last_err = Some(FetchError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            } else {
                debug!("{} → HTTP {}", url, status);
                return Ok(FetchOutcome::Missing {
                    status: status.as_u16(),
                });
            }
        }

        Err(last_err.unwrap_or_else(|| FetchError::Transport {
            url: url.to_string(),
            detail: "no attempt made".into(),
        }))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

// ── Capture ──────────────────────────────────────────────────────────────

/// Fetches through an inner fetcher and re-captures the result as a PNG.
///
/// Whatever raster format the service delivers, the staged asset is a PNG
/// the PDF backend can embed. A body that does not decode as an image is a
/// [`FetchError::Capture`].
pub struct CaptureFetcher {
    inner: Arc<dyn Fetcher>,
}

impl CaptureFetcher {
    pub fn new(inner: Arc<dyn Fetcher>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Fetcher for CaptureFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError> {
        let bytes = match self.inner.fetch(url).await? {
            FetchOutcome::Found(bytes) => bytes,
            missing => return Ok(missing),
        };

        let url_str = url.to_string();
        tokio::task::spawn_blocking(move || capture_png(&bytes))
            .await
            .map_err(|e| FetchError::Capture {
                url: url_str.clone(),
                detail: format!("capture task panicked: {e}"),
            })?
            .map(FetchOutcome::Found)
            .map_err(|detail| FetchError::Capture {
                url: url_str,
                detail,
            })
    }

    fn name(&self) -> &'static str {
        "capture"
    }
}

/// Decode any supported raster image and re-encode it losslessly as PNG.
fn capture_png(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let img = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(out)
}

/// Pick the fetcher used for embedded assets.
///
/// Page documents always go through `page_fetcher` unchanged; only assets
/// are affected by [`AssetMode`].
pub fn asset_fetcher(page_fetcher: Arc<dyn Fetcher>, mode: AssetMode) -> Arc<dyn Fetcher> {
    match mode {
        AssetMode::Raw => page_fetcher,
        AssetMode::Capture => Arc::new(CaptureFetcher::new(page_fetcher)),
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Serves bytes from a URL → body map; everything else is a 404.
///
/// Useful for replaying a mirrored book offline. Every request is recorded
/// so callers can assert on probe order.
#[derive(Default)]
pub struct MemoryFetcher {
    routes: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url` (exact match on the serialized URL).
    pub fn with(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.routes.insert(url.into(), body.into());
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.routes.insert(url.into(), body.into());
    }

    /// Every URL requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(url.to_string());
        }
        Ok(match self.routes.get(url.as_str()) {
            Some(body) => FetchOutcome::Found(body.clone()),
            None => FetchOutcome::Missing { status: 404 },
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
