//! Stages used by the bundled processors.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested without the others and without a task around it.
//!
//! ## Data Flow
//!
//! ```text
//! document-to-images:  PDF ──▶ render ──▶ page_NNN.jpg …
//! images-to-text:      page_NNN.jpg … ──▶ encode ──▶ llm ──▶ postprocess ──▶ .md
//! full-pipeline:       both, through a staging directory
//! ```
//!
//! 1. [`render`]: rasterise every page with pdfium; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 2. [`encode`]: base64-wrap each page image file for the multimodal API
//!    request body
//! 3. [`llm`]: drive the VLM call with retry/backoff; the only stage with
//!    network I/O
//! 4. [`postprocess`]: deterministic cleanup of VLM quirks, then join pages

pub mod encode;
pub mod llm;
pub mod postprocess;
pub mod render;
