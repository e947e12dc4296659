//! Parallel batch coordinator.
//!
//! Runs the chunk processor over every chunk not yet in the checkpoint, at
//! most `workers` at a time, and records each result the moment it lands.
//! Completion order is whatever the remote side makes it; only the
//! index → markdown mapping matters.
//!
//! An irrecoverable chunk failure (or a cancellation) stops new chunks from
//! starting. Chunks already in flight are allowed to finish and are
//! checkpointed, so the next run resumes with as much work saved as
//! possible.

use crate::batch::checkpoint::CheckpointStore;
use crate::batch::plan::Chunk;
use crate::batch::processor::{ChunkOutcome, ChunkProcessor, ChunkStrategy};
use crate::error::{BatchError, ConvertError};
use crate::output::{BatchReport, ChunkReport, ChunkStatus};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Cooperative stop signal shared between the caller and a running batch.
///
/// Once cancelled, no further chunk is dispatched. Remote calls already in
/// flight complete and their chunks are still checkpointed.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a batch in which every chunk completed.
#[derive(Debug)]
pub struct BatchRun {
    /// Markdown for every chunk index, resumed and fresh alike.
    pub completed: BTreeMap<usize, String>,
    pub report: BatchReport,
    /// Sum of per-chunk processing time (overlapping across workers).
    pub llm_duration_ms: u64,
}

enum Completion {
    Done(ChunkOutcome),
    Failed(ConvertError),
    RecordFailed(ChunkOutcome, BatchError),
    NotDispatched,
}

/// Process all `chunks` not already in `store`.
///
/// # Errors
/// - [`BatchError::BatchAborted`] for the first chunk that failed
///   irrecoverably, with the partial report
/// - [`BatchError::Cancelled`] if `cancel` fired before every chunk completed
/// - any error from the checkpoint store
pub async fn run_batch(
    chunks: &[Chunk],
    processor: &ChunkProcessor,
    store: &dyn CheckpointStore,
    workers: usize,
    cancel: &CancellationFlag,
    progress: Option<&ProgressCallback>,
) -> Result<BatchRun, BatchError> {
    let total = chunks.len();
    let mut completed = store.load().await?;
    let (resumed, pending): (Vec<&Chunk>, Vec<&Chunk>) =
        chunks.iter().partition(|c| completed.contains_key(&c.index));
    info!(
        "{} chunks: {} resumed from checkpoint, {} to convert with {} workers",
        total,
        resumed.len(),
        pending.len(),
        workers
    );
    if let Some(cb) = progress {
        cb.on_batch_start(total, pending.len());
    }

    let mut statuses: BTreeMap<usize, ChunkStatus> = BTreeMap::new();
    for chunk in resumed {
        statuses.insert(chunk.index, ChunkStatus::Resumed);
        if let Some(cb) = progress {
            cb.on_chunk_resumed(chunk.index, total);
        }
    }

    let stop = AtomicBool::new(false);
    let stop = &stop;

    let mut results = stream::iter(pending.into_iter().map(|chunk| async move {
        if stop.load(Ordering::SeqCst) || cancel.is_cancelled() {
            return (chunk, Completion::NotDispatched);
        }
        if let Some(cb) = progress {
            cb.on_chunk_start(chunk.index, total, chunk.first_page, chunk.last_page);
        }

        let completion = match processor.process(chunk).await {
            Ok(outcome) => match store.record(chunk.index, &outcome.markdown).await {
                Ok(()) => Completion::Done(outcome),
                Err(e) => {
                    stop.store(true, Ordering::SeqCst);
                    Completion::RecordFailed(outcome, e)
                }
            },
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                Completion::Failed(e)
            }
        };
        (chunk, completion)
    }))
    .buffer_unordered(workers.max(1));

    let mut llm_duration_ms = 0;
    let mut first_failure: Option<(&Chunk, ConvertError)> = None;
    let mut store_error: Option<BatchError> = None;

    while let Some((chunk, completion)) = results.next().await {
        let status = match completion {
            Completion::Done(outcome) => {
                llm_duration_ms += outcome.duration_ms;
                let subdivided = matches!(outcome.strategy, ChunkStrategy::Subdivided { .. });
                if let Some(cb) = progress {
                    cb.on_chunk_complete(chunk.index, total, outcome.markdown.len(), subdivided);
                }
                let status = status_of(outcome.strategy);
                completed.insert(chunk.index, outcome.markdown);
                status
            }
            Completion::RecordFailed(outcome, e) => {
                llm_duration_ms += outcome.duration_ms;
                store_error.get_or_insert(e);
                status_of(outcome.strategy)
            }
            Completion::Failed(error) => {
                warn!(
                    "Chunk {} (pages {}-{}) failed irrecoverably: {}",
                    chunk.index + 1,
                    chunk.first_page,
                    chunk.last_page,
                    error
                );
                if let Some(cb) = progress {
                    cb.on_chunk_error(chunk.index, total, &error.to_string());
                }
                if first_failure.is_none() {
                    first_failure = Some((chunk, error.clone()));
                }
                ChunkStatus::Failed { error }
            }
            Completion::NotDispatched => ChunkStatus::NotDispatched,
        };
        statuses.insert(chunk.index, status);
    }

    if let Some(cb) = progress {
        let done = chunks
            .iter()
            .filter(|c| completed.contains_key(&c.index))
            .count();
        cb.on_batch_complete(done, total);
    }

    if let Some(e) = store_error {
        return Err(e);
    }

    let report = BatchReport {
        chunks: chunks
            .iter()
            .map(|c| ChunkReport {
                index: c.index,
                first_page: c.first_page,
                last_page: c.last_page,
                status: statuses
                    .remove(&c.index)
                    .unwrap_or(ChunkStatus::NotDispatched),
            })
            .collect(),
    };

    if let Some((chunk, source)) = first_failure {
        return Err(BatchError::BatchAborted {
            chunk_index: chunk.index,
            first_page: chunk.first_page,
            last_page: chunk.last_page,
            source,
            report: Box::new(report),
        });
    }

    let done = report.completed_count();
    if done < total {
        warn!("Batch cancelled with {}/{} chunks complete", done, total);
        return Err(BatchError::Cancelled {
            completed: done,
            total,
            report: Box::new(report),
        });
    }

    Ok(BatchRun {
        completed,
        report,
        llm_duration_ms,
    })
}

fn status_of(strategy: ChunkStrategy) -> ChunkStatus {
    match strategy {
        ChunkStrategy::Direct => ChunkStatus::Converted,
        ChunkStrategy::Subdivided {
            sub_units,
            failed_pages,
        } => ChunkStatus::Subdivided {
            sub_units,
            failed_pages,
        },
    }
}
