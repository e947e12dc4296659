//! Instructions sent to the model, and the per-request user message.
//!
//! The system prompt carries the conversion rules; the user message carries
//! the page span and the content. Callers override the rules through
//! [`crate::config::BatchConfig::system_prompt`].

use crate::config::ContentMode;

/// Separator between pages inside a text-mode request.
pub const PAGE_BREAK: &str = "\n\n---PAGE BREAK---\n\n";

/// Conversion rules for extracted page text.
pub const DEFAULT_TEXT_PROMPT: &str = r#"You convert raw text extracted from a PDF into clean GitHub Flavored Markdown.

Rules:
- Remove running headers, footers and page numbers
- Preserve every heading using proper Markdown levels (# ## ### ...)
- Put code examples in fenced code blocks with a language identifier
- Convert tabular text to Markdown tables
- Keep list structure, emphasis and links
- Keep all technical content; do not summarise
- Pages are separated by "---PAGE BREAK---" markers; join text that flows across a break and do not reproduce the markers

Output ONLY the Markdown. Do not wrap it in ```markdown fences and do not add commentary."#;

/// Conversion rules for rendered page images.
pub const DEFAULT_IMAGE_PROMPT: &str = r#"You convert images of PDF pages into clean GitHub Flavored Markdown.

Rules:
- Transcribe all text in human reading order
- Remove running headers, footers and page numbers
- Preserve every heading using proper Markdown levels (# ## ### ...)
- Put code examples in fenced code blocks with a language identifier
- Convert tables to Markdown tables
- Keep list structure and emphasis
- The images are consecutive pages; continue text that flows from one page to the next

Output ONLY the Markdown. Do not wrap it in ```markdown fences and do not add commentary."#;

/// Built-in system prompt for a content mode.
pub fn default_prompt(mode: ContentMode) -> &'static str {
    match mode {
        ContentMode::Text => DEFAULT_TEXT_PROMPT,
        ContentMode::Image => DEFAULT_IMAGE_PROMPT,
    }
}

/// User message for a text-mode request.
///
/// `pages` yields `(page_number, text)` in page order.
pub fn text_request<'a>(
    first_page: usize,
    last_page: usize,
    pages: impl IntoIterator<Item = (usize, &'a str)>,
) -> String {
    let body = pages
        .into_iter()
        .map(|(num, text)| format!("PAGE {num}:\n{text}"))
        .collect::<Vec<_>>()
        .join(PAGE_BREAK);

    format!(
        "The text below is from {} of a technical document.\n\n{}\n\nConvert it to clean Markdown.",
        span_label(first_page, last_page),
        body
    )
}

/// User message accompanying the images of an image-mode request.
pub fn image_request(first_page: usize, last_page: usize) -> String {
    format!(
        "The attached images are {} of a document, in order. Convert them to clean Markdown.",
        span_label(first_page, last_page)
    )
}

fn span_label(first_page: usize, last_page: usize) -> String {
    if first_page == last_page {
        format!("page {first_page}")
    } else {
        format!("pages {first_page} to {last_page}")
    }
}
