//! Fetch the raster images a page SVG references and stage them on disk.
//!
//! Page SVGs reference their images relative to the page document, e.g.
//! `<image xlink:href="img/p12_fig1.png"/>`. The PDF backend loads such
//! references from the page's staging directory, so each image is fetched
//! and mirrored under a path derived from its resolved URL. For a page
//! served from `https://books.example/ebook/7/7.svg`:
//!
//! ```text
//! href                          staged as (under page_dir)      rewritten?
//! img/p1.png                    img/p1.png                      no
//! ./img/p1.png?v=3              img/p1.png                      yes
//! ../shared/logo.png            _root/ebook/shared/logo.png     yes
//! /static/logo.png              _root/static/logo.png           yes
//! https://cdn.example/a/b.png   _remote/cdn.example/a/b.png     yes
//! data:image/png;base64,...     (already embedded)              no
//! ```
//!
//! Images at different paths therefore never share a staged file, whatever
//! their file names. A reference is only rewritten when its mirrored path differs
//! from the original text, so pages with plain relative hrefs come out
//! byte-identical.
//! A failed image never fails the page: it is logged, reported as
//! [`PageError::AssetFetchFailed`], and the page renders without it.

use crate::error::PageError;
use crate::fetch::{FetchOutcome, Fetcher};
use reqwest::Url;
use roxmltree::{Document, ParsingOptions};
use serde::Serialize;
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Directory (under the page directory) for images served from other hosts.
const REMOTE_DIR: &str = "_remote";

/// Directory for same-host images outside the page document's directory.
const ROOT_DIR: &str = "_root";

/// One image reference and where it was staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetReference {
    /// The href as written in the page document.
    pub original_href: String,
    /// The href resolved against the page document URL.
    pub resolved_url: String,
    /// Absolute path of the staged file.
    pub local_path: PathBuf,
    /// Relative href the resolved document uses for this image.
    pub local_href: String,
}

/// A page document after asset resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPage {
    /// Document text, with hrefs rewritten where needed.
    pub content: String,
    /// Successfully staged images, in document order, without duplicates.
    pub assets: Vec<AssetReference>,
    /// One [`PageError::AssetFetchFailed`] per image that could not be staged.
    pub failures: Vec<PageError>,
}

/// An `<image>` href found in the document, with the byte range of its raw
/// attribute value in the source text.
#[derive(Debug)]
struct HrefSite {
    href: String,
    value_range: Option<Range<usize>>,
}

/// Stages the images referenced by page documents.
#[derive(Clone)]
pub struct AssetResolver {
    fetcher: Arc<dyn Fetcher>,
}

impl AssetResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Resolve every image reference in `content`.
    ///
    /// `base` is the URL the page document itself was served from; relative
    /// hrefs are joined against it. Images land under `page_dir`.
    pub async fn resolve(
        &self,
        page: usize,
        content: &str,
        base: &Url,
        page_dir: &Path,
    ) -> ResolvedPage {
        let sites = match find_image_hrefs(content) {
            Ok(sites) => sites,
            Err(e) => {
                // The assembler reports the unparseable page; nothing to stage.
                warn!("Page {}: not parseable as XML, skipping assets: {}", page, e);
                return ResolvedPage {
                    content: content.to_string(),
                    ..Default::default()
                };
            }
        };

        let mut assets = Vec::new();
        let mut failures = Vec::new();
        let mut edits: Vec<(Range<usize>, String)> = Vec::new();
        // href → local href once staged; `None` marks a failed href.
        let mut seen: HashMap<String, Option<String>> = HashMap::new();

        for site in sites {
            let staged = match seen.get(&site.href) {
                Some(prev) => prev.clone(),
                None => {
                    let result = self.stage(page, &site.href, base, page_dir).await;
                    let local_href = match result {
                        Ok(Some(asset)) => {
                            let local = asset.local_href.clone();
                            assets.push(asset);
                            Some(local)
                        }
                        Ok(None) => None,
                        Err(err) => {
                            warn!("{}", err);
                            failures.push(err);
                            None
                        }
                    };
                    seen.insert(site.href.clone(), local_href.clone());
                    local_href
                }
            };

            if let (Some(local_href), Some(range)) = (staged, site.value_range) {
                if local_href != site.href {
                    edits.push((range, escape_attr(&local_href)));
                }
            }
        }

        ResolvedPage {
            content: apply_edits(content, edits),
            assets,
            failures,
        }
    }

    /// Fetch and write one image. `Ok(None)` for hrefs with nothing to stage.
    async fn stage(
        &self,
        page: usize,
        href: &str,
        base: &Url,
        page_dir: &Path,
    ) -> Result<Option<AssetReference>, PageError> {
        let fail = |detail: String| PageError::AssetFetchFailed {
            page,
            href: href.to_string(),
            detail,
        };

        let resolved = base
            .join(href)
            .map_err(|e| fail(format!("cannot resolve against {base}: {e}")))?;
        let Some(local_href) = mirror_path(base, &resolved) else {
            debug!("Page {}: href {:?} names no file, skipping", page, href);
            return Ok(None);
        };

        let bytes = match self.fetcher.fetch(&resolved).await {
            Ok(FetchOutcome::Found(bytes)) => bytes,
            Ok(FetchOutcome::Missing { status }) => {
                return Err(fail(format!("HTTP {status} from {resolved}")))
            }
            Err(e) => return Err(fail(format!("{} fetcher: {e}", self.fetcher.name()))),
        };

        let local_path = page_dir.join(&local_href);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fail(format!("cannot create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&local_path, &bytes)
            .await
            .map_err(|e| fail(format!("cannot write {}: {e}", local_path.display())))?;

        debug!(
            "Page {}: staged {} ({} bytes, {}) as {}",
            page,
            resolved,
            bytes.len(),
            self.fetcher.name(),
            local_href
        );
        Ok(Some(AssetReference {
            original_href: href.to_string(),
            resolved_url: resolved.to_string(),
            local_path,
            local_href,
        }))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn find_image_hrefs(content: &str) -> Result<Vec<HrefSite>, roxmltree::Error> {
    let opts = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(content, opts)?;

    let mut sites = Vec::new();
    for node in doc.descendants() {
        if !node.is_element() || node.tag_name().name() != "image" {
            continue;
        }
        for attr in node.attributes() {
            let is_href = attr.name() == "href"
                && matches!(attr.namespace(), None | Some(XLINK_NS));
            if !is_href {
                continue;
            }
            let href = attr.value().trim();
            if href.is_empty() || href.starts_with("data:") {
                continue;
            }
            sites.push(HrefSite {
                href: href.to_string(),
                value_range: raw_value_range(content, attr.position()),
            });
        }
    }
    Ok(sites)
}

/// Byte range of the raw value of the attribute whose name starts at `pos`.
fn raw_value_range(content: &str, pos: usize) -> Option<Range<usize>> {
    let rest = content.get(pos..)?;
    let eq = rest.find('=')?;
    let after_eq = &rest[eq + 1..];
    let skipped = after_eq.len() - after_eq.trim_start().len();
    let quote = after_eq[skipped..].chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let start = pos + eq + 1 + skipped + 1;
    let len = content.get(start..)?.find(quote)?;
    Some(start..start + len)
}

/// Relative path under the page directory for the image at `resolved`.
///
/// Images inside the page document's own directory keep their path relative
/// to it. Other paths on the same host are mirrored whole under `_root/`,
/// other hosts under `_remote/{host}/`. Query and fragment are dropped.
/// `None` when the URL names no file, or names the page document itself.
fn mirror_path(page_url: &Url, resolved: &Url) -> Option<String> {
    let mut segments: Vec<String> = Vec::new();

    if !same_origin(page_url, resolved) {
        segments.push(REMOTE_DIR.to_string());
        segments.push(host_dir(resolved));
    } else {
        if resolved.path() == page_url.path() {
            return None;
        }
        let page_path = page_url.path();
        let page_dir = &page_path[..page_path.rfind('/').map_or(0, |i| i + 1)];
        match resolved.path().strip_prefix(page_dir) {
            Some(rest) if !page_dir.is_empty() => {
                segments.extend(clean_segments(rest));
                return (!segments.is_empty()).then(|| segments.join("/"));
            }
            _ => segments.push(ROOT_DIR.to_string()),
        }
    }

    let prefix = segments.len();
    segments.extend(clean_segments(resolved.path()));
    (segments.len() > prefix).then(|| segments.join("/"))
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// `host`, or `host_port` when the URL names a non-default port.
fn host_dir(url: &Url) -> String {
    let host = url.host_str().unwrap_or("unknown-host");
    match url.port() {
        Some(port) => format!("{host}_{port}"),
        None => host.to_string(),
    }
}

fn clean_segments(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(str::to_string)
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
        .replace('<', "&lt;")
}

fn apply_edits(content: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    if edits.is_empty() {
        return content.to_string();
    }
    edits.sort_by_key(|(range, _)| std::cmp::Reverse(range.start));
    let mut out = content.to_string();
    for (range, text) in edits {
        out.replace_range(range, &text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use tempfile::TempDir;

    const PAGE_URL: &str = "https://books.example/ebook/7/3.svg";

    fn page_url() -> Url {
        Url::parse(PAGE_URL).unwrap()
    }

    fn svg_with(images: &str) -> String {
        format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="10" height="10">{images}</svg>"#
        )
    }

    #[tokio::test]
    async fn plain_relative_href_is_staged_without_rewrite() {
        let fetcher = MemoryFetcher::new().with("https://books.example/ebook/7/img/a.png", "PNG");
        let resolver = AssetResolver::new(Arc::new(fetcher));
        let dir = TempDir::new().unwrap();
        let svg = svg_with(r#"<image xlink:href="img/a.png" width="1" height="1"/>"#);

        let page = resolver.resolve(3, &svg, &page_url(), dir.path()).await;
        assert_eq!(page.content, svg);
        assert!(page.failures.is_empty());
        assert_eq!(page.assets.len(), 1);
        assert_eq!(page.assets[0].local_href, "img/a.png");
        assert_eq!(
            std::fs::read(dir.path().join("img/a.png")).unwrap(),
            b"PNG"
        );
    }

    #[tokio::test]
    async fn dotted_and_query_hrefs_are_rewritten() {
        let fetcher = MemoryFetcher::new()
            .with("https://books.example/ebook/7/img/b.png?v=2", "B")
            .with("https://books.example/ebook/shared/logo.png", "L");
        let resolver = AssetResolver::new(Arc::new(fetcher));
        let dir = TempDir::new().unwrap();
        let svg = svg_with(
            r#"<image href="./img/b.png?v=2"/><image xlink:href='../shared/logo.png'/>"#,
        );

        let page = resolver.resolve(3, &svg, &page_url(), dir.path()).await;
        assert!(page.failures.is_empty(), "{:?}", page.failures);
        assert!(page.content.contains(r#"href="img/b.png""#));
        assert!(page
            .content
            .contains("xlink:href='_root/ebook/shared/logo.png'"));
        assert!(dir.path().join("_root/ebook/shared/logo.png").exists());
    }

    #[tokio::test]
    async fn same_file_name_in_different_directories_is_staged_twice() {
        let fetcher = MemoryFetcher::new()
            .with("https://books.example/ebook/7/3/img/a.png", "PAGE-LOCAL")
            .with("https://books.example/ebook/7/img/a.png", "SHARED")
            .with("https://books.example/img/a.png", "SITE-ROOT");
        let resolver = AssetResolver::new(Arc::new(fetcher));
        let dir = TempDir::new().unwrap();
        let base = Url::parse("https://books.example/ebook/7/3/3.svg").unwrap();
        let svg = svg_with(
            r#"<image xlink:href="../img/a.png"/><image xlink:href="img/a.png"/><image xlink:href="/img/a.png"/>"#,
        );

        let page = resolver.resolve(3, &svg, &base, dir.path()).await;
        assert!(page.failures.is_empty(), "{:?}", page.failures);
        let hrefs: Vec<&str> = page.assets.iter().map(|a| a.local_href.as_str()).collect();
        assert_eq!(
            hrefs,
            vec!["_root/ebook/7/img/a.png", "img/a.png", "_root/img/a.png"]
        );

        let read = |rel: &str| std::fs::read_to_string(dir.path().join(rel)).unwrap();
        assert_eq!(read("img/a.png"), "PAGE-LOCAL");
        assert_eq!(read("_root/ebook/7/img/a.png"), "SHARED");
        assert_eq!(read("_root/img/a.png"), "SITE-ROOT");
        assert!(page
            .content
            .contains(r#"xlink:href="_root/ebook/7/img/a.png""#));
        assert!(page.content.contains(r#"xlink:href="img/a.png""#));
        assert!(page.content.contains(r#"xlink:href="_root/img/a.png""#));
    }

    #[tokio::test]
    async fn absolute_urls_go_under_remote_dir() {
        let fetcher = MemoryFetcher::new().with("https://cdn.example/x/y.jpg", "J");
        let resolver = AssetResolver::new(Arc::new(fetcher));
        let dir = TempDir::new().unwrap();
        let svg = svg_with(r#"<image xlink:href="https://cdn.example/x/y.jpg"/>"#);

        let page = resolver.resolve(3, &svg, &page_url(), dir.path()).await;
        assert!(page
            .content
            .contains(r#"xlink:href="_remote/cdn.example/x/y.jpg""#));
        assert!(dir.path().join("_remote/cdn.example/x/y.jpg").exists());
    }

    #[tokio::test]
    async fn data_uris_and_duplicates_are_fetched_once_or_never() {
        let fetcher = Arc::new(
            MemoryFetcher::new().with("https://books.example/ebook/7/img/a.png", "A"),
        );
        let resolver = AssetResolver::new(fetcher.clone());
        let dir = TempDir::new().unwrap();
        let svg = svg_with(
            r#"<image xlink:href="img/a.png"/><image xlink:href="data:image/png;base64,AAAA"/><image xlink:href="img/a.png"/>"#,
        );

        let page = resolver.resolve(3, &svg, &page_url(), dir.path()).await;
        assert_eq!(page.assets.len(), 1);
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test]
    async fn failed_assets_are_collected_and_others_still_staged() {
        let fetcher = MemoryFetcher::new().with("https://books.example/ebook/7/ok.png", "OK");
        let resolver = AssetResolver::new(Arc::new(fetcher));
        let dir = TempDir::new().unwrap();
        let svg = svg_with(
            r#"<image xlink:href="gone1.png"/><image xlink:href="ok.png"/><image xlink:href="gone2.png"/>"#,
        );

        let page = resolver.resolve(3, &svg, &page_url(), dir.path()).await;
        assert_eq!(page.assets.len(), 1);
        assert_eq!(page.failures.len(), 2);
        assert!(matches!(
            &page.failures[0],
            PageError::AssetFetchFailed { page: 3, href, .. } if href == "gone1.png"
        ));
    }

    #[tokio::test]
    async fn unparseable_document_is_passed_through() {
        let resolver = AssetResolver::new(Arc::new(MemoryFetcher::new()));
        let dir = TempDir::new().unwrap();
        let page = resolver
            .resolve(1, "<svg><image", &page_url(), dir.path())
            .await;
        assert_eq!(page.content, "<svg><image");
        assert!(page.assets.is_empty() && page.failures.is_empty());
    }

    #[test]
    fn mirror_paths() {
        let base = page_url();
        let m = |h: &str| mirror_path(&base, &base.join(h).unwrap());
        assert_eq!(m("img/a.png").as_deref(), Some("img/a.png"));
        assert_eq!(m("/abs/root.png").as_deref(), Some("_root/abs/root.png"));
        assert_eq!(m("../up.png").as_deref(), Some("_root/ebook/up.png"));
        assert_eq!(m("a.png#frag").as_deref(), Some("a.png"));
        assert_eq!(
            m("//cdn.example/p.png").as_deref(),
            Some("_remote/cdn.example/p.png")
        );
        assert_eq!(
            m("http://books.example:8080/q.png").as_deref(),
            Some("_remote/books.example_8080/q.png")
        );
        assert_eq!(m("?only=query"), None);
        assert_eq!(m("./"), None);
    }

    #[test]
    fn raw_value_range_handles_spacing_and_quotes() {
        let text = r#"<image xlink:href = 'a.png'/>"#;
        let pos = text.find("xlink").unwrap();
        let r = raw_value_range(text, pos).unwrap();
        assert_eq!(&text[r], "a.png");
    }
}
