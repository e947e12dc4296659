//! I/O stages around the batch core.
//!
//! ```text
//! input ──▶ source ──▶ [batch] ──▶ client ──▶ postprocess
//! (URL/path) (pdfium)            (LLM call)  (cleanup)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`source`]: extract page text or rendered images; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`client`]: the remote conversion boundary; the only stage with
//!    network I/O after the download
//! 4. [`postprocess`]: cleanup applied to every model answer

pub mod client;
pub mod input;
pub mod postprocess;
pub mod source;
