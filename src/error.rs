//! Error types for the chunked-pdf2md library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`BatchError`]: **Fatal**. The run cannot produce a document (bad
//!   input, provider not configured, a chunk that could not be converted
//!   even after subdivision, a checkpoint that cannot be written). Returned
//!   as `Err(BatchError)` from the top-level `convert*` functions.
//!
//! * [`ConvertError`]: one remote conversion call failed. Its class decides
//!   what the chunk processor does next: retry, subdivide, or give up.
//!
//! * [`PageFailure`]: **Non-fatal**. A single page could not be converted
//!   even on its own. It is replaced by a visible placeholder in the output
//!   and listed in the run report, so one bad page never sinks a long
//!   document.

use crate::output::BatchReport;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the chunked-pdf2md library.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Content source errors ─────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The requested page range does not fit inside the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// The document has no pages to convert.
    #[error("PDF '{path}' contains no pages")]
    EmptyDocument { path: PathBuf },

    /// pdfium failed to extract text or render a specific page.
    #[error("Extraction failed for page {page}: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Batch errors ──────────────────────────────────────────────────────
    /// A chunk failed and could not be rescued by subdivision.
    ///
    /// Chunks completed before the abort stay in the checkpoint; rerunning
    /// with the same arguments resumes from there.
    #[error(
        "Batch aborted: chunk {} (pages {first_page}-{last_page}) failed: {source}\n\
         {} of {} chunks are checkpointed; rerun with the same arguments to resume.",
        .chunk_index + 1,
        .report.completed_count(),
        .report.chunks.len()
    )]
    BatchAborted {
        chunk_index: usize,
        first_page: usize,
        last_page: usize,
        #[source]
        source: ConvertError,
        report: Box<BatchReport>,
    },

    /// The run was cancelled before every chunk completed.
    #[error("Cancelled after {completed}/{total} chunks; completed chunks are checkpointed")]
    Cancelled {
        completed: usize,
        total: usize,
        report: Box<BatchReport>,
    },

    /// Assembly was attempted with chunk results missing.
    ///
    /// This indicates a coordinator or checkpoint bug and is never papered
    /// over by skipping the gap.
    #[error("Integrity error: {} of {num_chunks} chunk results missing (indices {missing:?})", .missing.len())]
    Integrity {
        missing: Vec<usize>,
        num_chunks: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// The checkpoint file could not be read, written or removed.
    #[error("Checkpoint I/O failed for '{path}': {source}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file exists but is not valid JSON.
    #[error("Checkpoint '{path}' is unreadable: {detail}\nDelete it or run with --no-resume.")]
    CheckpointCorrupt { path: PathBuf, detail: String },

    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single remote conversion call.
///
/// The two permanent classes are split by scope: a [`ConvertError::Rejected`]
/// request may succeed once the payload is smaller, a
/// [`ConvertError::Fatal`] one never will.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ConvertError {
    /// Timeout, connection reset, rate limit or retryable server error.
    #[error("transient failure: {detail}")]
    Transient { detail: String },

    /// The provider refused this particular payload (bad request, too
    /// large, content filtered, empty answer).
    #[error("request rejected: {detail}")]
    Rejected { detail: String },

    /// The provider refuses every request (auth, quota, unknown model).
    #[error("fatal provider error: {detail}")]
    Fatal { detail: String },
}

impl ConvertError {
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Transient {
            detail: detail.into(),
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self::Rejected {
            detail: detail.into(),
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Fatal {
            detail: detail.into(),
        }
    }

    /// Worth retrying the same request after a pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// No request to this provider can succeed; subdividing is pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// A page that could not be converted even on its own.
///
/// Stored in [`crate::output::ChunkStatus::Subdivided`]; the assembled
/// Markdown carries a placeholder comment in its place.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error("Page {page}: subdivision exhausted: {cause}")]
pub struct PageFailure {
    pub page: usize,
    pub cause: ConvertError,
}
