//! Configuration types for chunked PDF-to-Markdown conversion.
//!
//! Every knob of a run lives in [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. Resuming a run relies on the chunking knobs
//! (`chunk_size`, `mode`, `max_pages`) being identical between the two
//! invocations; everything else may change freely between attempts.

use crate::batch::CancellationFlag;
use crate::error::BatchError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a chunked PDF-to-Markdown run.
///
/// # Example
/// ```rust
/// use chunked_pdf2md::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .chunk_size(10)
///     .workers(2)
///     .model("anthropic/claude-sonnet-4")
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_size, 10);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Pages per chunk, i.e. per remote conversion call. Default: 25.
    ///
    /// Smaller chunks are more reliable and resume at a finer grain; larger
    /// chunks give the model more context across page breaks.
    pub chunk_size: usize,

    /// Maximum number of chunks converted concurrently. Default: 4.
    pub workers: usize,

    /// A failing chunk with at most this many pages is not subdivided. Default: 5.
    ///
    /// Also the lower bound on the size of the two halves a larger failing
    /// chunk is split into.
    pub min_subdivision_pages: usize,

    /// Attempts for a whole chunk when the failure is transient. Default: 3.
    ///
    /// Sub-units produced by subdivision always get a single attempt.
    pub max_attempts: u32,

    /// Delay before the first retry, doubled after each retry. Default: 5000 ms.
    pub initial_backoff_ms: u64,

    /// Minimum gap between two consecutive remote submissions across all
    /// workers. Default: 0 (no pacing).
    ///
    /// Useful against providers with strict per-minute request limits,
    /// especially in image mode where every page may become its own call.
    pub request_delay_ms: u64,

    /// Timeout for a remote call covering more than one page. Default: 300 s.
    pub api_timeout_secs: u64,

    /// Timeout for a remote call covering a single page. Default: 60 s.
    pub page_api_timeout_secs: u64,

    /// What the content source extracts from each page. Default: text.
    pub mode: ContentMode,

    /// Only convert the first N pages. Default: None (all pages).
    pub max_pages: Option<usize>,

    /// LLM model identifier, e.g. "anthropic/claude-sonnet-4".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openrouter", "openai", "anthropic").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 50 000.
    ///
    /// A 25-page chunk of dense technical text easily produces 30k tokens
    /// of Markdown; a low cap silently truncates the chunk.
    pub max_tokens: usize,

    /// Custom instructions sent as the system message. If None, uses the
    /// built-in prompt for the current [`ContentMode`].
    pub system_prompt: Option<String>,

    /// Image mode only: nominal rendering DPI. Range 72–400. Default: 150.
    pub dpi: u32,

    /// Image mode only: longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Directory receiving the Markdown output and the checkpoint file. Default: "output".
    pub output_dir: PathBuf,

    /// Resume from a matching checkpoint if one exists. Default: true.
    ///
    /// With `false` any existing checkpoint is discarded before the run, but
    /// progress is still checkpointed so a later run can resume.
    pub resume: bool,

    /// Receives per-chunk progress events.
    pub progress_callback: Option<ProgressCallback>,

    /// Stops dispatching new chunks once tripped. Clone it before building
    /// to keep a handle, e.g. for a Ctrl-C handler.
    pub cancellation: CancellationFlag,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            workers: 4,
            min_subdivision_pages: 5,
            max_attempts: 3,
            initial_backoff_ms: 5000,
            request_delay_ms: 0,
            api_timeout_secs: 300,
            page_api_timeout_secs: 60,
            mode: ContentMode::default(),
            max_pages: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 50_000,
            system_prompt: None,
            dpi: 150,
            max_rendered_pixels: 2000,
            password: None,
            download_timeout_secs: 60,
            output_dir: PathBuf::from("output"),
            resume: true,
            progress_callback: None,
            cancellation: CancellationFlag::default(),
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("chunk_size", &self.chunk_size)
            .field("workers", &self.workers)
            .field("min_subdivision_pages", &self.min_subdivision_pages)
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("request_delay_ms", &self.request_delay_ms)
            .field("mode", &self.mode)
            .field("max_pages", &self.max_pages)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_tokens", &self.max_tokens)
            .field("output_dir", &self.output_dir)
            .field("resume", &self.resume)
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`BatchConfig`].
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn chunk_size(mut self, pages: usize) -> Self {
        self.config.chunk_size = pages;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn min_subdivision_pages(mut self, pages: usize) -> Self {
        self.config.min_subdivision_pages = pages;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.initial_backoff_ms = ms;
        self
    }

    pub fn request_delay_ms(mut self, ms: u64) -> Self {
        self.config.request_delay_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn page_api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_api_timeout_secs = secs;
        self
    }

    pub fn mode(mut self, mode: ContentMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_pages(mut self, pages: usize) -> Self {
        self.config.max_pages = Some(pages);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.config.resume = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancellation(mut self, flag: CancellationFlag) -> Self {
        self.config.cancellation = flag;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(BatchError::InvalidConfig("Chunk size must be ≥ 1".into()));
        }
        if c.workers == 0 {
            return Err(BatchError::InvalidConfig("Workers must be ≥ 1".into()));
        }
        if c.min_subdivision_pages == 0 {
            return Err(BatchError::InvalidConfig(
                "Minimum subdivision size must be ≥ 1".into(),
            ));
        }
        if c.max_attempts == 0 {
            return Err(BatchError::InvalidConfig("Max attempts must be ≥ 1".into()));
        }
        if c.max_pages == Some(0) {
            return Err(BatchError::InvalidConfig("Max pages must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 || c.page_api_timeout_secs == 0 {
            return Err(BatchError::InvalidConfig("API timeouts must be ≥ 1s".into()));
        }
        Ok(self.config)
    }
}

impl fmt::Debug for BatchConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

/// What the content source hands to the model for each page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    /// Text extracted by pdfium; cheap, large chunks fit in one request. (default)
    #[default]
    Text,
    /// Rendered page images for vision models; handles scans and complex layouts.
    Image,
}

impl fmt::Display for ContentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentMode::Text => f.write_str("text"),
            ContentMode::Image => f.write_str("image"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_text_variant() {
        let c = BatchConfig::default();
        assert_eq!(c.chunk_size, 25);
        assert_eq!(c.workers, 4);
        assert_eq!(c.min_subdivision_pages, 5);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.initial_backoff_ms, 5000);
        assert_eq!(c.mode, ContentMode::Text);
        assert!(c.resume);
    }

    #[test]
    fn build_rejects_zero_chunk_size() {
        let err = BatchConfig::builder().chunk_size(0).build().unwrap_err();
        assert!(err.to_string().contains("Chunk size"), "got: {err}");
    }

    #[test]
    fn build_rejects_zero_workers() {
        assert!(BatchConfig::builder().workers(0).build().is_err());
    }

    #[test]
    fn build_rejects_zero_max_pages() {
        assert!(BatchConfig::builder().max_pages(0).build().is_err());
    }

    #[test]
    fn dpi_is_clamped() {
        let c = BatchConfig::builder().dpi(9000).build().unwrap();
        assert_eq!(c.dpi, 400);
    }

    #[test]
    fn content_mode_display_and_serde() {
        assert_eq!(ContentMode::Image.to_string(), "image");
        let json = serde_json::to_string(&ContentMode::Text).unwrap();
        assert_eq!(json, "\"text\"");
    }
}
