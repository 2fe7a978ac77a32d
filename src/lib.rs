//! # edgequake-book2pdf
//!
//! Download an e-book that is served as one SVG document per page and
//! assemble it into a single PDF.
//!
//! ## Why this crate?
//!
//! Web book viewers render each page from an SVG (`…/12.svg` or
//! `…/12/12.svg`) plus a handful of raster images. Printing from the browser
//! rasterises everything and loses the vector text. This crate fetches the
//! page documents directly, mirrors their images locally and converts every
//! page to a vector PDF page of the exact same size.
//!
//! Logging in and finding the book are left to the caller: the pipeline
//! receives a [`BookSession`] (base address, page count, title) and either a
//! cookie header in [`AcquisitionConfig`] or a ready-made [`Fetcher`].
//!
//! ## Pipeline Overview
//!
//! ```text
//! BookSession
//!  │
//!  ├─ 1. Locate    probe {base}/{n}.svg, then {base}/{n}/{n}.svg
//!  ├─ 2. Stage     write the page into a per-run temp directory
//!  ├─ 3. Assets    fetch <image> hrefs, mirror them next to the page
//!  ├─ 4. Handoff   inline, or bounded channel to a blocking thread
//!  ├─ 5. Assemble  svg2pdf → one PDF page per SVG, in book order
//!  └─ 6. Output    atomic write of {title}.pdf + run stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_book2pdf::{download_book, AcquisitionConfig, BookSession, RunOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = BookSession::new("https://books.example/ebook/4711", 212, "Physik 2")?;
//!     let config = AcquisitionConfig::builder()
//!         .cookie_header("PHPSESSID=…")
//!         .output_dir("books")
//!         .build()?;
//!
//!     let output = download_book(&session, &config).await?;
//!     match output.outcome {
//!         RunOutcome::Completed { pages_written } => println!("{pages_written} pages"),
//!         RunOutcome::AbortedPartial { pages_written, reason } => {
//!             eprintln!("partial book ({pages_written} pages): {reason}")
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `book2pdf` binary (clap + anyhow + tracing-subscriber + indicatif + serde_json) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-book2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod fetch;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{AcquisitionConfig, AcquisitionConfigBuilder, AssetMode, Schedule, StopHandle};
pub use convert::{assemble_book, convert_sync, download_book};
pub use error::{AbortReason, Book2PdfError, FetchError, PageError};
pub use fetch::{CaptureFetcher, FetchOutcome, Fetcher, HttpFetcher, MemoryFetcher};
pub use output::{AcquisitionReport, AcquisitionStats, BookOutput, RunOutcome};
pub use pipeline::acquire::{PageDescriptor, StageMessage};
pub use pipeline::assemble::PdfAssembler;
pub use progress::{AcquisitionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::BookSession;
pub use stream::{acquire_stream, PageStream};
