//! Input resolution: turn a path or URL into a local PDF file.
//!
//! pdfium needs a file-system path, so URLs are streamed into a `TempDir`
//! that lives as long as the [`ResolvedInput`]. Both routes check the `%PDF`
//! magic bytes before handing the file on.

use crate::error::BatchError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A local PDF ready for the content source.
pub struct ResolvedInput {
    path: PathBuf,
    /// The string the user passed in; identifies the document in checkpoints.
    origin: String,
    _temp_dir: Option<TempDir>,
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Size in bytes and blake3 hex digest of the resolved file.
    pub async fn digest(&self) -> Result<(u64, String), BatchError> {
        let content = tokio::fs::read(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => BatchError::PermissionDenied {
                path: self.path.clone(),
            },
            _ => BatchError::FileNotFound {
                path: self.path.clone(),
            },
        })?;
        let hash = blake3::hash(&content).to_hex().to_string();
        Ok((content.len() as u64, hash))
    }
}

/// File stem used to name the output when the caller gives none.
///
/// Computed from the input string alone, so the output (and checkpoint)
/// location is known before anything is downloaded.
pub fn output_stem(input: &str) -> String {
    let name = if is_url(input) {
        filename_from_url(input)
    } else {
        input.to_string()
    };
    Path::new(&name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, BatchError> {
    if is_url(input) {
        download(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, BatchError> {
    let path = PathBuf::from(path_str);
    if !path.exists() {
        return Err(BatchError::FileNotFound { path });
    }

    let mut magic = [0u8; 4];
    match std::fs::File::open(&path) {
        Ok(mut f) => {
            use std::io::Read;
            if f.read_exact(&mut magic).is_ok() && &magic != PDF_MAGIC {
                return Err(BatchError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(BatchError::PermissionDenied { path });
        }
        Err(_) => return Err(BatchError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    let origin = std::fs::canonicalize(&path)
        .unwrap_or_else(|_| path.clone())
        .to_string_lossy()
        .into_owned();

    Ok(ResolvedInput {
        path,
        origin,
        _temp_dir: None,
    })
}

/// Stream a URL into a temporary directory.
async fn download(url: &str, timeout_secs: u64) -> Result<ResolvedInput, BatchError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| BatchError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let timed_out = || BatchError::DownloadTimeout {
        url: url.to_string(),
        secs: timeout_secs,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            timed_out()
        } else {
            failed(e.to_string())
        }
    })?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let temp_dir = TempDir::new().map_err(|e| BatchError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));
    let mut file = tokio::fs::File::create(&file_path)
        .await
        .map_err(|e| BatchError::Internal(format!("Failed to create temp file: {e}")))?;

    let mut head = Vec::with_capacity(4);
    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(piece) = body.next().await {
        let piece = piece.map_err(|e| if e.is_timeout() { timed_out() } else { failed(e.to_string()) })?;
        if head.len() < 4 {
            let take = (4 - head.len()).min(piece.len());
            head.extend_from_slice(&piece[..take]);
        }
        file.write_all(&piece)
            .await
            .map_err(|e| BatchError::Internal(format!("Failed to write temp file: {e}")))?;
        written += piece.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| BatchError::Internal(format!("Failed to write temp file: {e}")))?;

    if head.len() == 4 && head.as_slice() != PDF_MAGIC {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&head);
        return Err(BatchError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    info!("Downloaded {} bytes to {}", written, file_path.display());
    Ok(ResolvedInput {
        path: file_path,
        origin: url.to_string(),
        _temp_dir: Some(temp_dir),
    })
}

/// Last URL path segment if it looks like a file name, else `downloaded.pdf`.
///
/// Document servers often use query-string URLs (`downloadFile.ashx?id=…`);
/// those fall back to the default name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| last.to_ascii_lowercase().ends_with(".pdf"))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
