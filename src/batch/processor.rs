//! Adaptive chunk processor: turn one chunk into Markdown, whatever it takes.
//!
//! The whole chunk is tried first, with exponential backoff on transient
//! failures. If that still fails and the chunk is larger than the
//! subdivision floor, it is split into halves (never smaller than the
//! floor) that each get one direct attempt. A failing multi-page half is
//! retried page by page, and a page that still fails is replaced by a
//! visible placeholder. So one poisoned page costs one placeholder, not the
//! document.
//!
//! Fatal errors (auth, quota, unknown model) skip all of this and propagate
//! immediately from any level.

use crate::batch::plan::Chunk;
use crate::config::BatchConfig;
use crate::error::{ConvertError, PageFailure};
use crate::pipeline::client::{ConversionClient, ConversionRequest};
use crate::pipeline::source::Page;
use crate::progress::ProgressCallback;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// How a chunk's Markdown was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// One whole-chunk request succeeded (possibly after retries).
    Direct,
    /// The whole-chunk request failed; converted piecewise.
    Subdivided {
        sub_units: usize,
        failed_pages: Vec<PageFailure>,
    },
}

/// The single result of a chunk, however many calls it took.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub index: usize,
    pub markdown: String,
    pub strategy: ChunkStrategy,
    pub duration_ms: u64,
}

/// Output of one piece of a subdivided chunk, after failures are absorbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutput {
    Converted(String),
    Placeholder(PageFailure),
}

impl UnitOutput {
    fn into_markdown(self) -> String {
        match self {
            UnitOutput::Converted(md) => md,
            UnitOutput::Placeholder(f) => failed_page_marker(f.page),
        }
    }
}

/// Inline marker for a page that could not be converted.
pub fn failed_page_marker(page: usize) -> String {
    format!("<!-- Failed to process page {page} -->")
}

/// Retry and subdivision policy for a single chunk.
#[derive(Clone)]
pub struct ChunkProcessor {
    client: Arc<dyn ConversionClient>,
    min_subdivision_pages: usize,
    max_attempts: u32,
    initial_backoff: Duration,
    progress: Option<ProgressCallback>,
}

impl ChunkProcessor {
    pub fn new(client: Arc<dyn ConversionClient>, config: &BatchConfig) -> Self {
        Self {
            client,
            min_subdivision_pages: config.min_subdivision_pages.max(1),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            progress: config.progress_callback.clone(),
        }
    }

    /// Convert `chunk`, subdividing on failure.
    ///
    /// # Errors
    /// The whole-chunk error when the chunk is at or below the subdivision
    /// floor, or any [`ConvertError::Fatal`] met along the way.
    pub async fn process(&self, chunk: &Chunk) -> Result<ChunkOutcome, ConvertError> {
        let start = Instant::now();
        let outcome = |markdown: String, strategy: ChunkStrategy| ChunkOutcome {
            index: chunk.index,
            markdown,
            strategy,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        let err = match self.convert_with_retry(chunk).await {
            Ok(markdown) => return Ok(outcome(markdown, ChunkStrategy::Direct)),
            Err(e) => e,
        };

        let len = chunk.pages.len();
        if err.is_fatal() || len <= self.min_subdivision_pages {
            return Err(err);
        }

        let half = self.min_subdivision_pages.max(len / 2);
        warn!(
            "Chunk {} (pages {}-{}) failed: {}; splitting into {}-page units",
            chunk.index + 1,
            chunk.first_page,
            chunk.last_page,
            err,
            half
        );
        if let Some(cb) = &self.progress {
            cb.on_chunk_subdivided(chunk.index, len, half);
        }

        let mut outputs = Vec::new();
        let mut sub_units = 0;
        for pages in chunk.pages.chunks(half) {
            sub_units += 1;
            outputs.extend(self.convert_sub_unit(chunk.index, pages).await?);
        }

        let failed_pages: Vec<PageFailure> = outputs
            .iter()
            .filter_map(|o| match o {
                UnitOutput::Placeholder(f) => Some(f.clone()),
                UnitOutput::Converted(_) => None,
            })
            .collect();
        let markdown = outputs
            .into_iter()
            .map(UnitOutput::into_markdown)
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(outcome(
            markdown,
            ChunkStrategy::Subdivided {
                sub_units,
                failed_pages,
            },
        ))
    }

    /// Whole-chunk attempt; transient failures retried with doubling backoff.
    async fn convert_with_retry(&self, chunk: &Chunk) -> Result<String, ConvertError> {
        let mut attempt = 1;
        loop {
            match self.attempt(chunk.index, &chunk.pages).await {
                Ok(md) => return Ok(md),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let backoff = self.initial_backoff * 2u32.pow(attempt - 1);
                    warn!(
                        "Chunk {}: attempt {}/{} failed ({}); retrying in {:?}",
                        chunk.index + 1,
                        attempt,
                        self.max_attempts,
                        e,
                        backoff
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One direct attempt at a sub-unit, falling back to single pages.
    async fn convert_sub_unit(
        &self,
        chunk_index: usize,
        pages: &[Page],
    ) -> Result<Vec<UnitOutput>, ConvertError> {
        let err = match self.attempt(chunk_index, pages).await {
            Ok(md) => return Ok(vec![UnitOutput::Converted(md)]),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => e,
        };

        if let [page] = pages {
            return Ok(vec![self.absorb(chunk_index, page.index, err)]);
        }

        debug!(
            "Chunk {}: pages {}-{} failed as a unit ({}); trying page by page",
            chunk_index + 1,
            pages[0].index,
            pages[pages.len() - 1].index,
            err
        );

        let mut outputs = Vec::with_capacity(pages.len());
        for page in pages {
            let output = match self.attempt(chunk_index, std::slice::from_ref(page)).await {
                Ok(md) => UnitOutput::Converted(md),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.absorb(chunk_index, page.index, e),
            };
            outputs.push(output);
        }
        Ok(outputs)
    }

    fn absorb(&self, chunk_index: usize, page: usize, cause: ConvertError) -> UnitOutput {
        warn!("Page {}: could not be converted: {}", page, cause);
        if let Some(cb) = &self.progress {
            cb.on_page_failed(chunk_index, page, &cause.to_string());
        }
        UnitOutput::Placeholder(PageFailure { page, cause })
    }

    async fn attempt(&self, chunk_index: usize, pages: &[Page]) -> Result<String, ConvertError> {
        self.client
            .convert(ConversionRequest { chunk_index, pages })
            .await
    }
}
