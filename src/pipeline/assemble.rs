//! Incremental SVG → PDF assembly.
//!
//! Each page SVG becomes a Form XObject (via `svg2pdf`) drawn onto a PDF page
//! whose MediaBox is exactly the SVG's intrinsic size, so mixed page sizes
//! (fold-outs, covers) survive. Pages are appended one at a time; the file is
//! only written by [`PdfAssembler::finalize`].
//!
//! ## Object layout
//!
//! ```text
//! 1      catalog
//! 2      page tree
//! 3      document info (title, producer)
//! 4..    per page: XObject + its resources, page, content stream
//! ```
//!
//! Nothing time- or randomness-dependent is written (no creation date, no
//! file ID), so two runs over the same pages give byte-identical files.
//!
//! This module is CPU-bound and synchronous. In the staged schedule it runs
//! on a `spawn_blocking` thread.

use super::acquire::PageDescriptor;
use crate::error::{Book2PdfError, PageError};
use pdf_writer::{Chunk, Content, Name, Pdf, Rect, Ref, TextStr};
use std::io::Write;
use std::path::Path;
use svg2pdf::usvg::{self, fontdb, PostProcessingSteps, TreeParsing, TreePostProc};
use tracing::{debug, info};

const CATALOG_ID: Ref = Ref::new(1);
const PAGE_TREE_ID: Ref = Ref::new(2);
const INFO_ID: Ref = Ref::new(3);
const FIRST_FREE_ID: i32 = 4;

const XOBJECT_NAME: Name<'static> = Name(b"P0");
const PRODUCER: &str = concat!("edgequake-book2pdf ", env!("CARGO_PKG_VERSION"));

/// Append-only PDF under construction.
pub struct PdfAssembler {
    title: String,
    total_pages: usize,
    fontdb: fontdb::Database,
    body: Chunk,
    next_ref: Ref,
    pages: Vec<Ref>,
    last_index: Option<usize>,
}

impl PdfAssembler {
    /// Start an empty document.
    ///
    /// With `system_fonts` the host's fonts are loaded so `<text>` elements
    /// can be converted to outlines; without them text is dropped.
    pub fn new(title: impl Into<String>, total_pages: usize, system_fonts: bool) -> Self {
        let mut db = fontdb::Database::new();
        if system_fonts {
            db.load_system_fonts();
            debug!("Loaded {} font faces", db.len());
        }
        Self {
            title: title.into(),
            total_pages,
            fontdb: db,
            body: Chunk::new(),
            next_ref: Ref::new(FIRST_FREE_ID),
            pages: Vec::new(),
            last_index: None,
        }
    }

    /// Pages committed so far.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Convert one page and commit it.
    ///
    /// On error nothing is added to the document.
    pub fn append(&mut self, page: &PageDescriptor) -> Result<(), PageError> {
        let page_num = page.page_num();
        if let Some(last) = self.last_index {
            if page.index <= last {
                return Err(PageError::OutOfOrder {
                    page: page_num,
                    last: last + 1,
                });
            }
        }

        let render_failed = |detail: String| PageError::RenderFailed {
            page: page_num,
            detail,
        };

        let text = match page.local_content {
            Some(ref text) => text.clone(),
            None => std::fs::read_to_string(&page.local_path).map_err(|e| {
                render_failed(format!("cannot read {}: {e}", page.local_path.display()))
            })?,
        };

        let opts = usvg::Options {
            resources_dir: Some(page.page_dir.clone()),
            ..usvg::Options::default()
        };
        let mut tree =
            usvg::Tree::from_str(&text, &opts).map_err(|e| render_failed(e.to_string()))?;
        tree.postprocess(PostProcessingSteps::default(), &self.fontdb);

        let (width, height) = (tree.size.width(), tree.size.height());

        let mut chunk = Chunk::new();
        let xobject_id = self.next_ref;
        let mut alloc = svg2pdf::convert_tree_into(
            &tree,
            svg2pdf::Options::default(),
            &mut chunk,
            xobject_id,
        );
        let page_id = alloc.bump();
        let content_id = alloc.bump();
        self.next_ref = alloc;

        {
            let mut pdf_page = chunk.page(page_id);
            pdf_page
                .media_box(Rect::new(0.0, 0.0, width, height))
                .parent(PAGE_TREE_ID)
                .contents(content_id);
            pdf_page
                .resources()
                .x_objects()
                .pair(XOBJECT_NAME, xobject_id);
        }

        let mut content = Content::new();
        content
            .transform([width, 0.0, 0.0, height, 0.0, 0.0])
            .x_object(XOBJECT_NAME);
        let stream = content.finish();
        chunk.stream(content_id, &stream);

        self.body.extend(&chunk);
        self.pages.push(page_id);
        self.last_index = Some(page.index);
        debug!(
            "Page {}: assembled ({}×{} pt, {} assets)",
            page_num,
            width,
            height,
            page.assets.len()
        );
        Ok(())
    }

    /// Serialize the document.
    ///
    /// Fails with [`Book2PdfError::FatalNoPages`] when nothing was committed.
    pub fn finish(self) -> Result<Vec<u8>, Book2PdfError> {
        if self.pages.is_empty() {
            return Err(Book2PdfError::FatalNoPages {
                total: self.total_pages,
            });
        }

        let mut pdf = Pdf::new();
        pdf.catalog(CATALOG_ID).pages(PAGE_TREE_ID);
        pdf.pages(PAGE_TREE_ID)
            .kids(self.pages.iter().copied())
            .count(self.pages.len() as i32);
        pdf.document_info(INFO_ID)
            .title(TextStr(&self.title))
            .producer(TextStr(PRODUCER));
        pdf.extend(&self.body);
        Ok(pdf.finish())
    }

    /// Write the document to `path` and return the number of pages.
    ///
    /// The bytes go to a temporary file in the destination directory that is
    /// renamed over `path`; an error leaves no partial file behind.
    pub fn finalize(self, path: &Path) -> Result<usize, Book2PdfError> {
        let pages = self.page_count();
        let bytes = self.finish()?;

        let write_failed = |source: std::io::Error| Book2PdfError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(write_failed)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_failed)?;
        tmp.write_all(&bytes).map_err(write_failed)?;
        tmp.as_file().sync_all().map_err(write_failed)?;
        tmp.persist(path).map_err(|e| write_failed(e.error))?;

        info!(
            "Wrote {} ({} pages, {} bytes)",
            path.display(),
            pages,
            bytes.len()
        );
        Ok(pages)
    }
}
