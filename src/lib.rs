//! # chunked-pdf2md
//!
//! Convert long PDF documents to Markdown with a hosted LLM, chunk by chunk,
//! surviving flaky networks, oversized requests and interrupted runs.
//!
//! ## Why chunks?
//!
//! A 400-page manual does not fit in one request, and one request per page
//! throws away the context that makes tables and code listings spanning a
//! page break come out right. So pages are grouped into fixed-size chunks
//! (25 by default), and each chunk is one remote call. Every finished chunk
//! is checkpointed to disk immediately; a crash, Ctrl-C or a chunk that
//! cannot be converted leaves all finished work in place, and the next run
//! picks up where the last one stopped.
//!
//! A chunk the model keeps refusing is split in halves, then into single
//! pages. A page that still fails becomes a visible
//! `<!-- Failed to process page N -->` marker instead of sinking the
//! document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input       resolve local file or download from URL
//!  ├─ 2. Source      extract page text (or render images) via pdfium, once
//!  ├─ 3. Plan        split pages into contiguous chunks
//!  ├─ 4. Coordinate  up to N chunks in flight, skip checkpointed ones
//!  │     └─ Process  retry with backoff, subdivide on failure
//!  ├─ 5. Assemble    concatenate chunk results in index order
//!  └─ 6. Output      atomic write, then drop the checkpoint
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chunked_pdf2md::{convert_to_file, BatchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = BatchConfig::builder().chunk_size(20).workers(4).build()?;
//!     let stats = convert_to_file("manual.pdf", "output/manual.md", &config).await?;
//!     eprintln!(
//!         "{} chunks, {} resumed, {} pages failed",
//!         stats.num_chunks, stats.resumed_chunks, stats.failed_pages
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `chunked-pdf2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! chunked-pdf2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{CancellationFlag, CheckpointStore, FileCheckpoint, MemoryCheckpoint};
pub use config::{BatchConfig, BatchConfigBuilder, ContentMode};
pub use convert::{convert, convert_pages, convert_sync, convert_to_file, default_output_path, inspect};
pub use error::{BatchError, ConvertError, PageFailure};
pub use output::{BatchOutput, BatchReport, BatchStats, ChunkReport, ChunkStatus, DocumentMetadata};
pub use pipeline::client::{ConversionClient, ConversionRequest, LlmConversionClient};
pub use pipeline::source::{Page, PageContent};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
