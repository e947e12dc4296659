//! Content source: pull per-page text or images out of a PDF via pdfium.
//!
//! pdfium keeps thread-local state and blocks, so every call runs inside
//! `spawn_blocking`. Extraction happens once, up front, before any chunk is
//! dispatched; the batch pipeline only ever sees the resulting [`Page`]s.
//!
//! In image mode each page is rasterised at `dpi` with its longest edge
//! capped at `max_rendered_pixels`, PNG-encoded (lossless keeps glyph edges crisp for
//! the vision model) and base64-wrapped as an [`ImageData`] attachment.

use crate::config::{BatchConfig, ContentMode};
use crate::error::BatchError;
use crate::output::DocumentMetadata;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

/// One page of the source document.
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based page number, stable across the whole document.
    pub index: usize,
    pub content: PageContent,
}

/// What the model receives for a page.
#[derive(Debug, Clone)]
pub enum PageContent {
    Text(String),
    Image(ImageData),
}

impl Page {
    pub fn text(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            content: PageContent::Text(text.into()),
        }
    }
}

/// Extract the pages in `range` (0-based, end-exclusive) from a PDF.
///
/// # Errors
/// `PageOutOfRange` if the range ends past the last page; `CorruptPdf`,
/// `PasswordRequired` or `WrongPassword` if the document cannot be opened;
/// `ExtractionFailed` if pdfium fails on an individual page.
pub async fn extract_pages(
    pdf_path: &Path,
    config: &BatchConfig,
    range: Range<usize>,
) -> Result<Vec<Page>, BatchError> {
    let path = pdf_path.to_path_buf();
    let password = config.password.clone();
    let mode = config.mode;
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;

    tokio::task::spawn_blocking(move || {
        extract_pages_blocking(&path, password.as_deref(), mode, dpi, max_pixels, range)
    })
    .await
    .map_err(|e| BatchError::Internal(format!("Extraction task panicked: {e}")))?
}

fn extract_pages_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    mode: ContentMode,
    dpi: u32,
    max_pixels: u32,
    range: Range<usize>,
) -> Result<Vec<Page>, BatchError> {
    let pdfium = Pdfium::default();
    let document = open_document(&pdfium, pdf_path, password)?;
    let pages = document.pages();
    let total = pages.len() as usize;

    if range.end > total {
        return Err(BatchError::PageOutOfRange {
            page: range.end,
            total,
        });
    }
    info!("Extracting {} pages ({} mode)", range.len(), mode);

    // PDF user space is 72 units per inch
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    range
        .map(|idx| -> Result<Page, BatchError> {
            let page_num = idx + 1;
            let failed = |detail: String| BatchError::ExtractionFailed {
                page: page_num,
                detail,
            };
            let page = pages.get(idx as u16).map_err(|e| failed(format!("{e:?}")))?;

            let content = match mode {
                ContentMode::Text => {
                    let text = page.text().map_err(|e| failed(format!("{e:?}")))?.all();
                    debug!("Page {}: {} chars of text", page_num, text.len());
                    PageContent::Text(text)
                }
                ContentMode::Image => {
                    let bitmap = page
                        .render_with_config(&render_config)
                        .map_err(|e| failed(format!("{e:?}")))?;
                    let data = encode_png(&bitmap.as_image())
                        .map_err(|e| failed(format!("PNG encoding failed: {e}")))?;
                    PageContent::Image(data)
                }
            };
            Ok(Page {
                index: page_num,
                content,
            })
        })
        .collect()
}

/// Read title, author and page count without extracting any content.
pub async fn inspect_document(
    pdf_path: &Path,
    password: Option<&str>,
) -> Result<DocumentMetadata, BatchError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(str::to_string);

    tokio::task::spawn_blocking(move || -> Result<DocumentMetadata, BatchError> {
        let pdfium = Pdfium::default();
        let document = open_document(&pdfium, &path, pwd.as_deref())?;
        let metadata = document.metadata();
        let tag = |t: PdfDocumentMetadataTagType| {
            metadata
                .get(t)
                .map(|v| v.value().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(DocumentMetadata {
            title: tag(PdfDocumentMetadataTagType::Title),
            author: tag(PdfDocumentMetadataTagType::Author),
            page_count: document.pages().len() as usize,
            pdf_version: format!("{:?}", document.version()),
        })
    })
    .await
    .map_err(|e| BatchError::Internal(format!("Metadata task panicked: {e}")))?
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, BatchError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let detail = format!("{e:?}");
        let path = pdf_path.to_path_buf();
        if detail.to_ascii_lowercase().contains("password") {
            if password.is_some() {
                BatchError::WrongPassword { path }
            } else {
                BatchError::PasswordRequired { path }
            }
        } else {
            BatchError::CorruptPdf { path, detail }
        }
    })
}

/// PNG + base64, with `detail: "high"` so fine print survives tiling.
fn encode_png(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(ImageData::new(STANDARD.encode(&buf), "image/png").with_detail("high"))
}
