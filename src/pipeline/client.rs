//! Remote conversion client: the boundary between the batch pipeline and
//! the hosted model.
//!
//! The pipeline only knows [`ConversionClient`]: hand over a run of pages,
//! get Markdown back or a classified [`ConvertError`]. The production
//! implementation, [`LlmConversionClient`], builds chat messages for an
//! `edgequake_llm` provider, enforces the per-call timeout and optional
//! request pacing, and maps provider errors onto the three error classes.

use crate::config::{BatchConfig, ContentMode};
use crate::error::{BatchError, ConvertError};
use crate::pipeline::postprocess::clean_fragment;
use crate::pipeline::source::{Page, PageContent};
use crate::prompts::{default_prompt, image_request, text_request};
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError, ProviderFactory,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, timeout, Duration};
use tracing::debug;

/// One remote conversion call: a contiguous run of pages.
#[derive(Debug, Clone, Copy)]
pub struct ConversionRequest<'a> {
    /// 0-based index of the chunk these pages belong to.
    pub chunk_index: usize,
    /// Contiguous, in page order, never empty.
    pub pages: &'a [Page],
}

impl ConversionRequest<'_> {
    pub fn first_page(&self) -> usize {
        self.pages.first().map_or(0, |p| p.index)
    }

    pub fn last_page(&self) -> usize {
        self.pages.last().map_or(0, |p| p.index)
    }
}

/// Converts page content to Markdown.
///
/// Implementations must be cheap to share between workers; the coordinator
/// calls `convert` from up to `workers` tasks at once.
#[async_trait]
pub trait ConversionClient: Send + Sync {
    async fn convert(&self, request: ConversionRequest<'_>) -> Result<String, ConvertError>;
}

/// [`ConversionClient`] backed by an `edgequake_llm` chat provider.
pub struct LlmConversionClient {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
    chunk_timeout: Duration,
    page_timeout: Duration,
    pacer: Option<Pacer>,
}

impl LlmConversionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &BatchConfig) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| default_prompt(config.mode).to_string());

        Self {
            provider,
            system_prompt,
            options: CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            },
            chunk_timeout: Duration::from_secs(config.api_timeout_secs),
            page_timeout: Duration::from_secs(config.page_api_timeout_secs),
            pacer: (config.request_delay_ms > 0)
                .then(|| Pacer::new(Duration::from_millis(config.request_delay_ms))),
        }
    }

    fn build_messages(&self, request: &ConversionRequest<'_>) -> Vec<ChatMessage> {
        let (first, last) = (request.first_page(), request.last_page());
        let mut texts = Vec::new();
        let mut images: Vec<ImageData> = Vec::new();
        for page in request.pages {
            match &page.content {
                PageContent::Text(t) => texts.push((page.index, t.as_str())),
                PageContent::Image(img) => images.push(img.clone()),
            }
        }

        let user = if images.is_empty() {
            ChatMessage::user(text_request(first, last, texts))
        } else {
            ChatMessage::user_with_images(image_request(first, last), images)
        };
        vec![ChatMessage::system(&self.system_prompt), user]
    }
}

#[async_trait]
impl ConversionClient for LlmConversionClient {
    async fn convert(&self, request: ConversionRequest<'_>) -> Result<String, ConvertError> {
        let messages = self.build_messages(&request);
        let limit = if request.pages.len() == 1 {
            self.page_timeout
        } else {
            self.chunk_timeout
        };

        if let Some(pacer) = &self.pacer {
            pacer.wait_turn().await;
        }

        let start = Instant::now();
        let response = timeout(limit, self.provider.chat(&messages, Some(&self.options)))
            .await
            .map_err(|_| ConvertError::transient(format!("timed out after {}s", limit.as_secs())))?
            .map_err(|e| classify_provider_error(&e))?;

        debug!(
            "Pages {}-{}: {} input tokens, {} output tokens, {:?}",
            request.first_page(),
            request.last_page(),
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        let markdown = clean_fragment(&response.content);
        if markdown.is_empty() {
            return Err(ConvertError::rejected("model returned no content"));
        }
        Ok(markdown)
    }
}

/// Map a provider error onto a [`ConvertError`] class.
///
/// Failures that no smaller request could fix (credentials, unknown model,
/// a model that cannot take this input) are `Fatal`. Server and transport
/// failures the provider layer would back off on are `Transient`. What is
/// left concerns the request content and is `Rejected`: not retried, but
/// eligible for subdivision.
pub fn classify_provider_error(error: &LlmError) -> ConvertError {
    let message = error.to_string();
    match error {
        LlmError::Timeout | LlmError::NetworkError(_) | LlmError::RateLimited(_) => {
            ConvertError::transient(message)
        }
        LlmError::AuthError(_)
        | LlmError::ModelNotFound(_)
        | LlmError::ConfigError(_)
        | LlmError::NotSupported(_) => ConvertError::fatal(message),
        LlmError::TokenLimitExceeded { .. }
        | LlmError::InvalidRequest(_)
        | LlmError::SerializationError(_) => ConvertError::rejected(message),
        LlmError::ApiError(_) => match http_status(&message) {
            Some(401 | 402 | 403) => ConvertError::fatal(message),
            Some(408 | 429 | 500..=599) => ConvertError::transient(message),
            Some(400..=499) => ConvertError::rejected(message),
            _ if error.retry_strategy().should_retry() => ConvertError::transient(message),
            _ => ConvertError::rejected(message),
        },
        LlmError::ProviderError(_) if error.retry_strategy().should_retry() => {
            ConvertError::transient(message)
        }
        _ => classify_message(&message),
    }
}

/// Keyword fallback for errors that carry nothing but text.
fn classify_message(message: &str) -> ConvertError {
    const TRANSIENT: &[&str] = &[
        "timeout", "timed out", "connection", "connect error", "broken pipe",
        "rate limit", "ratelimit", "too many requests", "overloaded", "unavailable",
        "temporarily",
    ];
    const FATAL: &[&str] = &[
        "unauthorized", "forbidden", "authentication", "api key", "insufficient_quota",
        "quota", "billing", "credits", "model not found", "no such model",
    ];

    let lower = message.to_ascii_lowercase();
    let status = http_status(&lower);

    if matches!(status, Some(401 | 402 | 403)) || FATAL.iter().any(|k| lower.contains(k)) {
        ConvertError::fatal(message)
    } else if matches!(status, Some(408 | 429 | 500..=599))
        || TRANSIENT.iter().any(|k| lower.contains(k))
    {
        ConvertError::transient(message)
    } else {
        ConvertError::rejected(message)
    }
}

fn http_status(message: &str) -> Option<u16> {
    RE_HTTP_STATUS
        .captures(message)
        .and_then(|c| c[1].parse::<u16>().ok())
}

static RE_HTTP_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([45]\d\d)\b").unwrap());

/// Enforces a minimum gap between consecutive submissions across workers.
struct Pacer {
    gap: Duration,
    next_slot: Mutex<Option<tokio::time::Instant>>,
}

impl Pacer {
    fn new(gap: Duration) -> Self {
        Self {
            gap,
            next_slot: Mutex::new(None),
        }
    }

    async fn wait_turn(&self) {
        let mut next = self.next_slot.lock().await;
        if let Some(at) = *next {
            sleep_until(at).await;
        }
        *next = Some(tokio::time::Instant::now() + self.gap);
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. pre-built `config.provider`
/// 2. `config.provider_name` (+ `config.model`)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
/// 4. OpenAI when `OPENAI_API_KEY` is set
/// 5. whatever `ProviderFactory::from_env` detects
pub fn resolve_provider(config: &BatchConfig) -> Result<Arc<dyn LLMProvider>, BatchError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model(config.mode));
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(default_model(config.mode));
        return create_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BatchError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                 Error: {e}"
            ),
        })?;
    Ok(llm_provider)
}

fn default_model(mode: ContentMode) -> &'static str {
    match mode {
        ContentMode::Text => "gpt-4.1-mini",
        ContentMode::Image => "gpt-4.1-nano",
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, BatchError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        BatchError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}
