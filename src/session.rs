//! The book handed over by the session/auth layer.
//!
//! Logging in, picking a book from the shelf and reading its page count are
//! the caller's business. What reaches the pipeline is a [`BookSession`]:
//! a normalized base address, a positive page count and a display title.

use crate::error::Book2PdfError;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

/// Characters that are illegal in file names on at least one mainstream OS.
static ILLEGAL_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("static regex"));

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Longest title stem kept in the output file name.
const MAX_FILE_STEM_CHARS: usize = 120;

/// A resolved book: where its pages live, how many there are, what it's called.
#[derive(Debug, Clone)]
pub struct BookSession {
    base_url: Url,
    page_count: usize,
    title: String,
}

impl BookSession {
    /// Validate and normalize a session.
    ///
    /// The base address loses any query, fragment and trailing slashes so
    /// that `base + "/1.svg"` is always well-formed.
    pub fn new(
        base_url: &str,
        page_count: usize,
        title: impl Into<String>,
    ) -> Result<Self, Book2PdfError> {
        if page_count == 0 {
            return Err(Book2PdfError::InvalidSession(
                "page count must be greater than zero".into(),
            ));
        }

        let mut url = Url::parse(base_url.trim()).map_err(|e| {
            Book2PdfError::InvalidSession(format!("base URL '{base_url}' is not a URL: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Book2PdfError::InvalidSession(format!(
                "base URL '{base_url}' must be http or https"
            )));
        }

        url.set_query(None);
        url.set_fragment(None);
        let trimmed = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed);

        Ok(Self {
            base_url: url,
            page_count,
            title: title.into(),
        })
    }

    /// Build a session from the URL of an open book viewer page.
    ///
    /// The viewer lives next to the page documents, so the base is the viewer
    /// URL with its last path segment removed.
    pub fn from_viewer_url(
        viewer_url: &str,
        page_count: usize,
        title: impl Into<String>,
    ) -> Result<Self, Book2PdfError> {
        let url = Url::parse(viewer_url.trim()).map_err(|e| {
            Book2PdfError::InvalidSession(format!("viewer URL '{viewer_url}' is not a URL: {e}"))
        })?;
        let path = url.path();
        let parent = match path.rfind('/') {
            Some(pos) => &path[..pos],
            None => "",
        };
        let mut base = url.clone();
        base.set_path(parent);
        Self::new(base.as_str(), page_count, title)
    }

    /// Base address without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// File name of the assembled PDF, e.g. `"Physics 2.pdf"`.
    pub fn output_file_name(&self) -> String {
        format!("{}.pdf", sanitize_title(&self.title))
    }
}

/// Make a book title safe to use as a file stem.
///
/// Whitespace runs (tabs and newlines included) collapse to one space, the
/// remaining illegal characters become `_`, leading/trailing dots and spaces
/// are dropped (Windows rejects them), and an empty result falls back to
/// `"book"`.
pub fn sanitize_title(title: &str) -> String {
    // Tabs and newlines sit inside the control range; collapse them first.
    let collapsed = WHITESPACE_RUN.replace_all(title, " ");
    let replaced = ILLEGAL_FILENAME_CHARS.replace_all(&collapsed, "_");
    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());

    let stem: String = trimmed.chars().take(MAX_FILE_STEM_CHARS).collect();
    let stem = stem.trim_end_matches(|c: char| c == '.' || c.is_whitespace());
    if stem.is_empty() || stem.chars().all(|c| c == '_') {
        "book".to_string()
    } else {
        stem.to_string()
    }
}
