//! Checkpoint store: durable `chunk_index → markdown` mapping for resume.
//!
//! The coordinator loads the mapping once, records every chunk as it
//! completes, and the top-level conversion clears it once the output file
//! is on disk. An index present in the checkpoint is never converted again.
//!
//! [`FileCheckpoint`] persists to a JSON file that also stores a
//! [`Fingerprint`] of the run. A checkpoint written for another document
//! (or other bytes at the same location), page count, chunk size or mode is
//! discarded on load instead of being resumed into the wrong output.

use crate::config::ContentMode;
use crate::error::BatchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Durable store of completed chunk results.
///
/// `record` may be called concurrently from several workers.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Everything recorded so far.
    async fn load(&self) -> Result<BTreeMap<usize, String>, BatchError>;

    /// Add one completed chunk and persist it before returning.
    async fn record(&self, index: usize, markdown: &str) -> Result<(), BatchError>;

    /// Forget everything, including any persisted state.
    async fn clear(&self) -> Result<(), BatchError>;
}

/// Identity of a run. A checkpoint only resumes a run with the same one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Input path or URL as given to the resolver.
    pub source: String,
    /// Size of the resolved PDF in bytes.
    pub source_bytes: u64,
    /// blake3 hex digest of the resolved PDF.
    pub content_hash: String,
    pub total_pages: usize,
    pub chunk_size: usize,
    pub mode: ContentMode,
}

#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    fingerprint: Fingerprint,
    completed_chunks: BTreeMap<usize, String>,
}

/// Checkpoint path for an output file: `<dir>/.<file name>.checkpoint.json`.
pub fn checkpoint_path(output_path: &Path) -> PathBuf {
    let name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.md".to_string());
    output_path.with_file_name(format!(".{name}.checkpoint.json"))
}

/// [`CheckpointStore`] backed by a JSON file, rewritten atomically on every
/// record.
pub struct FileCheckpoint {
    path: PathBuf,
    fingerprint: Fingerprint,
    completed: Mutex<BTreeMap<usize, String>>,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>, fingerprint: Fingerprint) -> Self {
        Self {
            path: path.into(),
            fingerprint,
            completed: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, completed: &BTreeMap<usize, String>) -> Result<(), BatchError> {
        let io_err = |source| BatchError::CheckpointIo {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let file = CheckpointFile {
            fingerprint: self.fingerprint.clone(),
            completed_chunks: completed.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| BatchError::Internal(format!("checkpoint serialisation: {e}")))?;

        // Atomic write: a crash mid-write must not leave a torn checkpoint
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(io_err)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn load(&self) -> Result<BTreeMap<usize, String>, BatchError> {
        let mut completed = self.completed.lock().await;

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint at {}", self.path.display());
                completed.clear();
                return Ok(BTreeMap::new());
            }
            Err(source) => {
                return Err(BatchError::CheckpointIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: CheckpointFile =
            serde_json::from_slice(&bytes).map_err(|e| BatchError::CheckpointCorrupt {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;

        if file.fingerprint != self.fingerprint {
            warn!(
                "Discarding checkpoint {}: written for {:?}, current run is {:?}",
                self.path.display(),
                file.fingerprint,
                self.fingerprint
            );
            completed.clear();
            return Ok(BTreeMap::new());
        }

        info!(
            "Loaded checkpoint with {} completed chunks from {}",
            file.completed_chunks.len(),
            self.path.display()
        );
        *completed = file.completed_chunks;
        Ok(completed.clone())
    }

    async fn record(&self, index: usize, markdown: &str) -> Result<(), BatchError> {
        // Held across the write so concurrent records persist in turn
        let mut completed = self.completed.lock().await;
        completed.insert(index, markdown.to_string());
        self.persist(&completed).await
    }

    async fn clear(&self) -> Result<(), BatchError> {
        let mut completed = self.completed.lock().await;
        completed.clear();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Removed checkpoint {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BatchError::CheckpointIo {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// In-process [`CheckpointStore`]; nothing survives the process.
#[derive(Default)]
pub struct MemoryCheckpoint {
    completed: Mutex<BTreeMap<usize, String>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing mapping, as if a previous run had recorded it.
    pub fn with_entries(entries: BTreeMap<usize, String>) -> Self {
        Self {
            completed: Mutex::new(entries),
        }
    }

    pub async fn snapshot(&self) -> BTreeMap<usize, String> {
        self.completed.lock().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoint {
    async fn load(&self) -> Result<BTreeMap<usize, String>, BatchError> {
        Ok(self.snapshot().await)
    }

    async fn record(&self, index: usize, markdown: &str) -> Result<(), BatchError> {
        self.completed
            .lock()
            .await
            .insert(index, markdown.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), BatchError> {
        self.completed.lock().await.clear();
        Ok(())
    }
}
