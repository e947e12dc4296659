//! Result types: assembled document, per-chunk report and run statistics.

use crate::error::{ConvertError, PageFailure};
use serde::{Deserialize, Serialize};

/// Everything a successful run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    /// The assembled Markdown document.
    pub markdown: String,
    /// What happened to each chunk.
    pub report: BatchReport,
    pub stats: BatchStats,
}

/// Itemised outcome of every chunk in a run, ordered by chunk index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub chunks: Vec<ChunkReport>,
}

impl BatchReport {
    /// Chunks whose Markdown is in the checkpoint (resumed or converted now).
    pub fn completed_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.status.is_completed()).count()
    }

    pub fn resumed_count(&self) -> usize {
        self.count(|s| matches!(s, ChunkStatus::Resumed))
    }

    pub fn converted_count(&self) -> usize {
        self.count(|s| matches!(s, ChunkStatus::Converted | ChunkStatus::Subdivided { .. }))
    }

    pub fn subdivided_count(&self) -> usize {
        self.count(|s| matches!(s, ChunkStatus::Subdivided { .. }))
    }

    /// Every page replaced by a placeholder, in chunk then page order.
    pub fn failed_pages(&self) -> Vec<&PageFailure> {
        self.chunks
            .iter()
            .filter_map(|c| match &c.status {
                ChunkStatus::Subdivided { failed_pages, .. } => Some(failed_pages.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn count(&self, pred: impl Fn(&ChunkStatus) -> bool) -> usize {
        self.chunks.iter().filter(|c| pred(&c.status)).count()
    }
}

/// One line of the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReport {
    /// 0-based chunk index.
    pub index: usize,
    /// 1-based, inclusive.
    pub first_page: usize,
    /// 1-based, inclusive.
    pub last_page: usize,
    pub status: ChunkStatus,
}

/// Final state of a chunk at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Restored from the checkpoint; no remote call made.
    Resumed,
    /// Converted by a single whole-chunk request.
    Converted,
    /// Whole-chunk request failed; converted piecewise.
    Subdivided {
        sub_units: usize,
        failed_pages: Vec<PageFailure>,
    },
    /// Failed irrecoverably; caused the batch to abort.
    Failed { error: ConvertError },
    /// Never started because the batch aborted or was cancelled first.
    NotDispatched,
}

impl ChunkStatus {
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            ChunkStatus::Resumed | ChunkStatus::Converted | ChunkStatus::Subdivided { .. }
        )
    }
}

/// Timing and volume statistics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    /// Pages fed to the chunk planner (after `max_pages`).
    pub total_pages: usize,
    pub num_chunks: usize,
    pub resumed_chunks: usize,
    pub converted_chunks: usize,
    pub subdivided_chunks: usize,
    /// Pages replaced by a placeholder.
    pub failed_pages: usize,
    pub total_duration_ms: u64,
    pub extract_duration_ms: u64,
    pub llm_duration_ms: u64,
}

/// Basic facts about a PDF, available without any LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, status: ChunkStatus) -> ChunkReport {
        ChunkReport {
            index,
            first_page: index * 10 + 1,
            last_page: index * 10 + 10,
            status,
        }
    }

    #[test]
    fn report_counts() {
        let report = BatchReport {
            chunks: vec![
                chunk(0, ChunkStatus::Resumed),
                chunk(1, ChunkStatus::Converted),
                chunk(
                    2,
                    ChunkStatus::Subdivided {
                        sub_units: 2,
                        failed_pages: vec![PageFailure {
                            page: 27,
                            cause: ConvertError::transient("timeout"),
                        }],
                    },
                ),
                chunk(
                    3,
                    ChunkStatus::Failed {
                        error: ConvertError::rejected("400"),
                    },
                ),
                chunk(4, ChunkStatus::NotDispatched),
            ],
        };

        assert_eq!(report.completed_count(), 3);
        assert_eq!(report.resumed_count(), 1);
        assert_eq!(report.converted_count(), 2);
        assert_eq!(report.subdivided_count(), 1);
        let failed: Vec<usize> = report.failed_pages().iter().map(|f| f.page).collect();
        assert_eq!(failed, vec![27]);
    }

    #[test]
    fn status_serialises_with_tag() {
        let json = serde_json::to_string(&ChunkStatus::Resumed).unwrap();
        assert_eq!(json, r#"{"status":"resumed"}"#);
    }
}
