//! Top-level conversion entry points.
//!
//! [`convert_to_file`] is what the CLI runs: resolve the input, extract every
//! page once, convert chunk by chunk with checkpointing, assemble, write the
//! output atomically and only then drop the checkpoint. An interrupted or
//! aborted run leaves the checkpoint behind; calling it again with the same
//! arguments converts only what is missing.
//!
//! [`convert_pages`] is the batch core on its own, for callers that bring
//! their own pages, conversion client or checkpoint store.

use crate::batch::{
    assemble, build_chunks, checkpoint_path, run_batch, CheckpointStore, ChunkProcessor,
    FileCheckpoint, Fingerprint,
};
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::output::{BatchOutput, BatchStats, DocumentMetadata};
use crate::pipeline::client::{resolve_provider, ConversionClient, LlmConversionClient};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::source::{self, Page};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Convert a PDF file or URL to Markdown and return it.
///
/// Progress is checkpointed next to [`default_output_path`] while the run is
/// going, and the checkpoint is removed once the document is assembled.
///
/// # Errors
/// Any fatal [`BatchError`]: bad input, provider not configured, a chunk
/// that failed irrecoverably, cancellation, or checkpoint I/O.
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &BatchConfig,
) -> Result<BatchOutput, BatchError> {
    let input_str = input_str.as_ref();
    let output_path = default_output_path(input_str, config);
    let (output, store) = run_document(input_str, &output_path, config).await?;
    store.clear().await?;
    Ok(output)
}

/// Convert a PDF and write the Markdown to `output_path`.
///
/// The file is written atomically (temp file + rename); the checkpoint is
/// cleared only after the rename succeeded.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &BatchConfig,
) -> Result<BatchStats, BatchError> {
    let path = output_path.as_ref();
    let (output, store) = run_document(input_str.as_ref(), path, config).await?;

    write_atomic(path, &output.markdown).await?;
    info!("Wrote {} bytes to {}", output.markdown.len(), path.display());

    store.clear().await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &BatchConfig,
) -> Result<BatchOutput, BatchError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| BatchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Extract PDF metadata (including the page count) without converting.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &BatchConfig,
) -> Result<DocumentMetadata, BatchError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    source::inspect_document(resolved.path(), config.password.as_deref()).await
}

/// `<output_dir>/<input stem>.md`.
pub fn default_output_path(input_str: &str, config: &BatchConfig) -> PathBuf {
    config
        .output_dir
        .join(format!("{}.md", input::output_stem(input_str)))
}

/// Chunk, convert and assemble pages that are already extracted.
///
/// Chunks found in `store` are not converted again. With
/// `config.resume == false` the store is cleared first.
pub async fn convert_pages(
    pages: Vec<Page>,
    config: &BatchConfig,
    client: Arc<dyn ConversionClient>,
    store: &dyn CheckpointStore,
) -> Result<BatchOutput, BatchError> {
    let start = Instant::now();
    if !config.resume {
        store.clear().await?;
    }

    let total_pages = pages.len();
    let chunks = build_chunks(pages, config.chunk_size);
    let num_chunks = chunks.len();
    let processor = ChunkProcessor::new(client, config);

    let run = run_batch(
        &chunks,
        &processor,
        store,
        config.workers,
        &config.cancellation,
        config.progress_callback.as_ref(),
    )
    .await?;

    let markdown = assemble(&run.completed, num_chunks)?;

    let stats = BatchStats {
        total_pages,
        num_chunks,
        resumed_chunks: run.report.resumed_count(),
        converted_chunks: run.report.converted_count(),
        subdivided_chunks: run.report.subdivided_count(),
        failed_pages: run.report.failed_pages().len(),
        total_duration_ms: start.elapsed().as_millis() as u64,
        extract_duration_ms: 0,
        llm_duration_ms: run.llm_duration_ms,
    };
    info!(
        "Assembled {} chunks ({} resumed, {} converted, {} subdivided, {} failed pages)",
        num_chunks,
        stats.resumed_chunks,
        stats.converted_chunks,
        stats.subdivided_chunks,
        stats.failed_pages
    );

    Ok(BatchOutput {
        markdown,
        report: run.report,
        stats,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Everything up to assembly, leaving the checkpoint in place.
async fn run_document(
    input_str: &str,
    output_path: &Path,
    config: &BatchConfig,
) -> Result<(BatchOutput, FileCheckpoint), BatchError> {
    let total_start = Instant::now();
    info!("Starting conversion: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;

    // Fail on a missing API key before spending time on extraction
    let provider = resolve_provider(config)?;
    let client: Arc<dyn ConversionClient> = Arc::new(LlmConversionClient::new(provider, config));

    let extract_start = Instant::now();
    let pages = extract(&resolved, config).await?;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
    info!("Extracted {} pages in {}ms", pages.len(), extract_duration_ms);

    let (source_bytes, content_hash) = resolved.digest().await?;
    let store = FileCheckpoint::new(
        checkpoint_path(output_path),
        Fingerprint {
            source: resolved.origin().to_string(),
            source_bytes,
            content_hash,
            total_pages: pages.len(),
            chunk_size: config.chunk_size,
            mode: config.mode,
        },
    );

    let mut output = convert_pages(pages, config, client, &store).await?;
    output.stats.extract_duration_ms = extract_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Conversion complete: {} pages in {}ms",
        output.stats.total_pages, output.stats.total_duration_ms
    );
    Ok((output, store))
}

/// Extract the first `max_pages` pages (or all of them).
async fn extract(resolved: &ResolvedInput, config: &BatchConfig) -> Result<Vec<Page>, BatchError> {
    let metadata = source::inspect_document(resolved.path(), config.password.as_deref()).await?;
    if metadata.page_count == 0 {
        return Err(BatchError::EmptyDocument {
            path: resolved.path().to_path_buf(),
        });
    }

    let count = config
        .max_pages
        .map_or(metadata.page_count, |max| max.min(metadata.page_count));
    info!("PDF has {} pages, converting {}", metadata.page_count, count);

    source::extract_pages(resolved.path(), config, 0..count).await
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), BatchError> {
    let write_err = |source| BatchError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_path_uses_stem() {
        let config = BatchConfig::builder().output_dir("out").build().unwrap();
        assert_eq!(
            default_output_path("papers/guide.pdf", &config),
            PathBuf::from("out/guide.md")
        );
    }

    #[tokio::test]
    async fn write_atomic_creates_parent_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/doc.md");
        write_atomic(&path, "# Doc").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Doc");
        assert!(!path.with_extension("md.tmp").exists());
    }

    #[tokio::test]
    async fn missing_input_fails_before_provider_lookup() {
        let err = convert("/no/such/file.pdf", &BatchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::FileNotFound { .. }));
    }
}
