//! Pipeline stages for SVG-book acquisition and assembly.
//!
//! Each submodule implements one step and is testable on its own with an
//! in-memory fetcher.
//!
//! ## Data Flow
//!
//! ```text
//! locate ──▶ assets ──▶ (handoff) ──▶ assemble
//! (probe)    (stage)                  (svg2pdf)
//! ```
//!
//! 1. [`locate`]   — find the page document under one of two URL layouts,
//!    remembering which one worked
//! 2. [`assets`]   — fetch the images the page references and mirror them
//!    into the page's staging directory
//! 3. [`acquire`]  — the in-order page loop with its failure budget and the
//!    hand-off to the assembler (inline or over a bounded channel)
//! 4. [`assemble`] — convert each page to a PDF page and write the document
//!    once; CPU-bound, runs in `spawn_blocking` in the staged schedule

pub mod acquire;
pub mod assemble;
pub mod assets;
pub mod locate;
