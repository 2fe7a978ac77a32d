//! Find the SVG document for a page under one of two URL layouts.
//!
//! Books on the service come in two layouts and nothing in the session says
//! which one:
//!
//! ```text
//! Flat    {base}/{n}.svg
//! Nested  {base}/{n}/{n}.svg
//! ```
//!
//! A book almost never mixes layouts, so the locator remembers the last
//! layout that worked and probes it first. On a uniform book this halves the
//! number of requests after the first page.

use crate::error::PageError;
use crate::fetch::{FetchOutcome, Fetcher};
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, warn};

/// One of the two known page URL layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UrlPattern {
    /// `{base}/{n}.svg`
    Flat,
    /// `{base}/{n}/{n}.svg`
    Nested,
}

impl UrlPattern {
    /// Page document URL under this layout (`page_num` is 1-based).
    pub fn url_for(self, base: &str, page_num: usize) -> String {
        let base = base.trim_end_matches('/');
        match self {
            UrlPattern::Flat => format!("{base}/{page_num}.svg"),
            UrlPattern::Nested => format!("{base}/{page_num}/{page_num}.svg"),
        }
    }

    fn other(self) -> Self {
        match self {
            UrlPattern::Flat => UrlPattern::Nested,
            UrlPattern::Nested => UrlPattern::Flat,
        }
    }
}

/// A page document that was found.
#[derive(Debug, Clone)]
pub struct Located {
    pub url: Url,
    pub pattern: UrlPattern,
    pub bytes: Vec<u8>,
}

/// Probes page URLs, carrying the layout hint from page to page.
#[derive(Debug, Clone)]
pub struct PageLocator {
    base: String,
    hint: UrlPattern,
}

impl PageLocator {
    /// Start with the flat layout as the first guess.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            hint: UrlPattern::Flat,
        }
    }

    /// The layout that will be probed first for the next page.
    pub fn hint(&self) -> UrlPattern {
        self.hint
    }

    /// Locate page `index` (0-based) of a `total`-page book.
    ///
    /// Non-success statuses and fetch errors both count as a failed probe.
    /// When both layouts fail the result is [`PageError::PageNotFound`]
    /// listing every URL tried.
    pub async fn locate(
        &mut self,
        fetcher: &dyn Fetcher,
        index: usize,
        total: usize,
    ) -> Result<Located, PageError> {
        let page = index + 1;
        if index >= total {
            return Err(PageError::PageNotFound {
                page,
                tried: Vec::new(),
            });
        }

        let mut tried = Vec::with_capacity(2);
        for pattern in [self.hint, self.hint.other()] {
            let candidate = pattern.url_for(&self.base, page);
            let url = match Url::parse(&candidate) {
                Ok(u) => u,
                Err(e) => {
                    warn!("Page {}: bad candidate URL {}: {}", page, candidate, e);
                    tried.push(candidate);
                    continue;
                }
            };

            match fetcher.fetch(&url).await {
                Ok(FetchOutcome::Found(bytes)) => {
                    if pattern != self.hint {
                        debug!("Page {}: switching layout hint to {:?}", page, pattern);
                    }
                    self.hint = pattern;
                    return Ok(Located {
                        url,
                        pattern,
                        bytes,
                    });
                }
                Ok(FetchOutcome::Missing { status }) => {
                    debug!("Page {}: {} → HTTP {} [{}]", page, url, status, fetcher.name());
                }
                Err(e) => {
                    warn!("Page {}: {} fetcher: {}", page, fetcher.name(), e);
                }
            }
            tried.push(candidate);
        }

        Err(PageError::PageNotFound { page, tried })
    }
}
