//! Batch pipeline integration tests.
//!
//! Planner, processor, coordinator, checkpoint store and assembler run
//! together against a scripted in-memory conversion client, so no PDF
//! engine or API key is needed.
//!
//! Run with:
//!   cargo test --test batch

use async_trait::async_trait;
use chunked_pdf2md::batch::{assemble, plan_chunks, Fingerprint};
use chunked_pdf2md::pipeline::client::classify_provider_error;
use chunked_pdf2md::{
    convert_pages, BatchConfig, BatchError, CancellationFlag, CheckpointStore, ChunkStatus,
    ContentMode, ConversionClient, ConversionRequest, ConvertError, FileCheckpoint,
    MemoryCheckpoint, Page,
};
use edgequake_llm::LlmError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Answers every request with `md <first>-<last>` unless a failure is
/// scripted for that exact page span. Scripted failures are consumed in
/// order; once exhausted the span succeeds.
#[derive(Default)]
struct MockClient {
    failures: Mutex<HashMap<(usize, usize), VecDeque<ConvertError>>>,
    delays: HashMap<usize, Duration>,
    calls: Mutex<Vec<(usize, usize)>>,
    completions: Mutex<Vec<usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockClient {
    fn new() -> Self {
        Self::default()
    }

    fn failing(mut self, span: (usize, usize), errors: Vec<ConvertError>) -> Self {
        self.failures
            .get_mut()
            .unwrap()
            .insert(span, errors.into());
        self
    }

    /// Delay every request belonging to `chunk_index`.
    fn delayed(mut self, chunk_index: usize, ms: u64) -> Self {
        self.delays.insert(chunk_index, Duration::from_millis(ms));
        self
    }

    fn calls(&self) -> Vec<(usize, usize)> {
        self.calls.lock().unwrap().clone()
    }

    fn completions(&self) -> Vec<usize> {
        self.completions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversionClient for MockClient {
    async fn convert(&self, req: ConversionRequest<'_>) -> Result<String, ConvertError> {
        let span = (req.first_page(), req.last_page());
        self.calls.lock().unwrap().push(span);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&req.chunk_index) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&span)
            .and_then(VecDeque::pop_front);
        self.completions.lock().unwrap().push(req.chunk_index);

        match failure {
            Some(err) => Err(err),
            None => Ok(format!("md {}-{}", span.0, span.1)),
        }
    }
}

/// Fails every request with the same provider error, classified the way
/// the LLM client classifies it.
struct BrokenProvider {
    error: fn() -> LlmError,
    calls: AtomicUsize,
}

impl BrokenProvider {
    fn new(error: fn() -> LlmError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConversionClient for BrokenProvider {
    async fn convert(&self, _req: ConversionRequest<'_>) -> Result<String, ConvertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(classify_provider_error(&(self.error)()))
    }
}

/// Accepts loads, fails every record with an I/O error.
#[derive(Default)]
struct FullDisk {
    records: Mutex<Vec<usize>>,
}

#[async_trait]
impl CheckpointStore for FullDisk {
    async fn load(&self) -> Result<BTreeMap<usize, String>, BatchError> {
        Ok(BTreeMap::new())
    }

    async fn record(&self, index: usize, _markdown: &str) -> Result<(), BatchError> {
        self.records.lock().unwrap().push(index);
        Err(BatchError::CheckpointIo {
            path: ".out.md.checkpoint.json".into(),
            source: std::io::Error::other("disk full"),
        })
    }

    async fn clear(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

fn pages(n: usize) -> Vec<Page> {
    (1..=n)
        .map(|i| Page::text(i, format!("text of page {i}")))
        .collect()
}

fn config(chunk_size: usize, workers: usize) -> BatchConfig {
    BatchConfig::builder()
        .chunk_size(chunk_size)
        .workers(workers)
        .min_subdivision_pages(5)
        .max_attempts(3)
        .initial_backoff_ms(1)
        .build()
        .unwrap()
}

/// The document a run produces when every chunk converts directly.
fn expected_document(total_pages: usize, chunk_size: usize) -> String {
    plan_chunks(total_pages, chunk_size)
        .iter()
        .map(|s| format!("md {}-{}", s.first_page, s.last_page))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Checkpoint entries for the given chunk indices, as a previous run
/// would have recorded them.
fn checkpointed(total_pages: usize, chunk_size: usize, indices: &[usize]) -> BTreeMap<usize, String> {
    plan_chunks(total_pages, chunk_size)
        .into_iter()
        .filter(|s| indices.contains(&s.index))
        .map(|s| (s.index, format!("md {}-{}", s.first_page, s.last_page)))
        .collect()
}

fn statuses(err: &BatchError) -> Vec<&ChunkStatus> {
    match err {
        BatchError::BatchAborted { report, .. } | BatchError::Cancelled { report, .. } => {
            report.chunks.iter().map(|c| &c.status).collect()
        }
        other => panic!("expected an error carrying a report, got {other}"),
    }
}

// ── Planner and assembler ────────────────────────────────────────────────────

#[test]
fn fifty_five_pages_plan_into_three_chunks() {
    let spans: Vec<(usize, usize)> = plan_chunks(55, 25)
        .iter()
        .map(|s| (s.first_page, s.last_page))
        .collect();
    assert_eq!(spans, vec![(1, 25), (26, 50), (51, 55)]);
}

#[test]
fn assembly_with_a_gap_is_an_integrity_error() {
    let mapping = checkpointed(10, 2, &[0, 1, 2, 4]);
    let err = assert_err!(assemble(&mapping, 5));
    assert!(
        matches!(err, BatchError::Integrity { ref missing, num_chunks: 5 } if *missing == vec![3]),
        "got: {err}"
    );
}

// ── Resume ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_run_converts_every_chunk() {
    let client = Arc::new(MockClient::new());
    let store = MemoryCheckpoint::new();

    let out = assert_ok!(convert_pages(pages(55), &config(25, 4), client.clone(), &store).await);

    assert_eq!(out.markdown, expected_document(55, 25));
    assert_eq!(client.calls().len(), 3);
    assert_eq!(out.stats.num_chunks, 3);
    assert_eq!(out.stats.converted_chunks, 3);
    assert_eq!(store.snapshot().await.len(), 3);
}

#[tokio::test]
async fn complete_checkpoint_makes_no_remote_calls() {
    let store = MemoryCheckpoint::new();
    let first = assert_ok!(
        convert_pages(pages(23), &config(5, 2), Arc::new(MockClient::new()), &store).await
    );

    let client = Arc::new(MockClient::new());
    let second = assert_ok!(convert_pages(pages(23), &config(5, 2), client.clone(), &store).await);

    assert!(client.calls().is_empty());
    assert_eq!(second.markdown, first.markdown);
    assert_eq!(second.stats.resumed_chunks, 5);
    assert_eq!(second.stats.converted_chunks, 0);
}

#[tokio::test]
async fn partial_checkpoint_submits_only_missing_chunks() {
    // 10 chunks, 4 already done
    let store = MemoryCheckpoint::with_entries(checkpointed(20, 2, &[0, 3, 4, 9]));
    let client = Arc::new(MockClient::new());

    let out = assert_ok!(convert_pages(pages(20), &config(2, 3), client.clone(), &store).await);

    let mut calls = client.calls();
    calls.sort();
    assert_eq!(calls, vec![(3, 4), (5, 6), (11, 12), (13, 14), (15, 16), (17, 18)]);
    assert_eq!(out.markdown, expected_document(20, 2));
    assert_eq!(out.report.resumed_count(), 4);
    assert!(matches!(out.report.chunks[3].status, ChunkStatus::Resumed));
    assert!(matches!(out.report.chunks[1].status, ChunkStatus::Converted));
}

#[tokio::test]
async fn no_resume_discards_the_checkpoint() {
    let store = MemoryCheckpoint::with_entries(checkpointed(10, 5, &[0, 1]));
    let client = Arc::new(MockClient::new());
    let cfg = BatchConfig {
        resume: false,
        ..config(5, 2)
    };

    assert_ok!(convert_pages(pages(10), &cfg, client.clone(), &store).await);
    assert_eq!(client.calls().len(), 2);
}

// ── Subdivision ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn bad_page_becomes_a_placeholder() {
    let rejected = || vec![ConvertError::rejected("400 Bad Request")];
    let client = Arc::new(
        MockClient::new()
            .failing((1, 12), rejected())
            .failing((7, 12), rejected())
            .failing((9, 9), rejected()),
    );
    let store = MemoryCheckpoint::new();

    let out = assert_ok!(convert_pages(pages(12), &config(12, 1), client.clone(), &store).await);

    let expected = [
        "md 1-6",
        "md 7-7",
        "md 8-8",
        "<!-- Failed to process page 9 -->",
        "md 10-10",
        "md 11-11",
        "md 12-12",
    ]
    .join("\n\n");
    assert_eq!(out.markdown, expected);

    // 1 whole-chunk + 2 halves + 6 single pages
    assert_eq!(client.calls().len(), 9);
    assert_eq!(out.stats.subdivided_chunks, 1);
    assert_eq!(out.stats.failed_pages, 1);
    let failed: Vec<usize> = out.report.failed_pages().iter().map(|f| f.page).collect();
    assert_eq!(failed, vec![9]);

    // the chunk is complete despite the placeholder
    assert_eq!(store.snapshot().await[&0], expected);
}

#[tokio::test]
async fn transient_failures_retry_before_subdividing() {
    let client = Arc::new(MockClient::new().failing(
        (1, 10),
        vec![ConvertError::transient("timed out"), ConvertError::transient("429")],
    ));
    let store = MemoryCheckpoint::new();

    let out = assert_ok!(convert_pages(pages(10), &config(10, 1), client.clone(), &store).await);

    assert_eq!(client.calls(), vec![(1, 10); 3]);
    assert_eq!(out.markdown, "md 1-10");
    assert_eq!(out.stats.subdivided_chunks, 0);
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn reverse_completion_order_still_assembles_in_page_order() {
    // chunk 0 is slowest, chunk 9 fastest
    let client = (0..10).fold(MockClient::new(), |c, i| c.delayed(i, (10 - i as u64) * 15));
    let client = Arc::new(client);
    let store = MemoryCheckpoint::new();

    let out = assert_ok!(convert_pages(pages(20), &config(2, 4), client.clone(), &store).await);

    let order = client.completions();
    let mut sorted = order.clone();
    sorted.sort();
    assert_ne!(order, sorted, "chunks should complete out of order");
    assert_eq!(sorted, (0..10).collect::<Vec<_>>());

    assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 4);

    let sequential = assert_ok!(
        convert_pages(pages(20), &config(2, 1), Arc::new(MockClient::new()), &MemoryCheckpoint::new())
            .await
    );
    assert_eq!(out.markdown, sequential.markdown);
}

// ── Abort and cancellation ───────────────────────────────────────────────────

#[tokio::test]
async fn failing_chunk_aborts_and_keeps_finished_work() {
    // 2-page chunks are below the subdivision floor, so chunk 2 cannot be rescued
    let client = Arc::new(
        MockClient::new().failing((5, 6), vec![ConvertError::rejected("content filtered")]),
    );
    let store = MemoryCheckpoint::new();

    let err = assert_err!(convert_pages(pages(10), &config(2, 1), client.clone(), &store).await);

    match &err {
        BatchError::BatchAborted {
            chunk_index,
            first_page,
            last_page,
            source,
            ..
        } => {
            assert_eq!(*chunk_index, 2);
            assert_eq!((*first_page, *last_page), (5, 6));
            assert_eq!(*source, ConvertError::rejected("content filtered"));
        }
        other => panic!("expected abort, got {other}"),
    }
    let s = statuses(&err);
    assert!(matches!(s[0], ChunkStatus::Converted));
    assert!(matches!(s[1], ChunkStatus::Converted));
    assert!(matches!(s[2], ChunkStatus::Failed { .. }));
    assert!(matches!(s[3], ChunkStatus::NotDispatched));
    assert!(matches!(s[4], ChunkStatus::NotDispatched));
    assert_eq!(client.calls(), vec![(1, 2), (3, 4), (5, 6)]);

    let kept: Vec<usize> = store.snapshot().await.keys().copied().collect();
    assert_eq!(kept, vec![0, 1]);

    // rerun picks up from the checkpoint
    let retry = Arc::new(MockClient::new());
    let out = assert_ok!(convert_pages(pages(10), &config(2, 1), retry.clone(), &store).await);
    assert_eq!(retry.calls(), vec![(5, 6), (7, 8), (9, 10)]);
    assert_eq!(out.markdown, expected_document(10, 2));
}

#[tokio::test]
async fn fatal_error_aborts_without_subdividing() {
    let client = Arc::new(
        MockClient::new().failing((1, 12), vec![ConvertError::fatal("401 Unauthorized")]),
    );
    let store = MemoryCheckpoint::new();

    let err = assert_err!(convert_pages(pages(12), &config(12, 1), client.clone(), &store).await);

    assert!(matches!(err, BatchError::BatchAborted { ref source, .. } if source.is_fatal()));
    assert_eq!(client.calls(), vec![(1, 12)]);
}

#[tokio::test]
async fn unsupported_input_aborts_instead_of_writing_placeholders() {
    let client = Arc::new(BrokenProvider::new(|| {
        LlmError::NotSupported("image input".to_string())
    }));
    let store = MemoryCheckpoint::new();

    let err = assert_err!(convert_pages(pages(12), &config(12, 1), client.clone(), &store).await);

    assert!(matches!(err, BatchError::BatchAborted { ref source, .. } if source.is_fatal()));
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert!(store.snapshot().await.is_empty());
}

#[tokio::test]
async fn server_errors_are_retried_then_abort_on_small_chunks() {
    let client = Arc::new(BrokenProvider::new(|| {
        LlmError::ApiError("Internal server error".to_string())
    }));
    let store = MemoryCheckpoint::new();

    let err = assert_err!(convert_pages(pages(4), &config(4, 1), client.clone(), &store).await);

    assert!(matches!(err, BatchError::BatchAborted { ref source, .. } if source.is_transient()));
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn checkpoint_write_failure_stops_the_batch() {
    let client = Arc::new(MockClient::new());
    let store = FullDisk::default();

    let err = assert_err!(convert_pages(pages(10), &config(1, 1), client.clone(), &store).await);

    assert!(matches!(err, BatchError::CheckpointIo { .. }), "got: {err}");
    assert_eq!(*store.records.lock().unwrap(), vec![0]);
    assert_eq!(client.calls(), vec![(1, 1)]);
}

#[tokio::test]
async fn cancelled_run_dispatches_nothing_new() {
    let cancel = CancellationFlag::new();
    cancel.cancel();
    let cfg = BatchConfig {
        cancellation: cancel,
        ..config(2, 2)
    };
    let store = MemoryCheckpoint::with_entries(checkpointed(10, 2, &[0, 1]));
    let client = Arc::new(MockClient::new());

    let err = assert_err!(convert_pages(pages(10), &cfg, client.clone(), &store).await);

    assert!(matches!(err, BatchError::Cancelled { completed: 2, total: 5, .. }), "got: {err}");
    assert!(client.calls().is_empty());
    assert!(statuses(&err)[2..]
        .iter()
        .all(|s| matches!(s, ChunkStatus::NotDispatched)));
}

// ── File checkpoint ──────────────────────────────────────────────────────────

fn fingerprint(chunk_size: usize) -> Fingerprint {
    Fingerprint {
        source: "/docs/manual.pdf".to_string(),
        source_bytes: 48_213,
        content_hash: "9f2c".repeat(16),
        total_pages: 10,
        chunk_size,
        mode: ContentMode::Text,
    }
}

#[tokio::test]
async fn file_checkpoint_resumes_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".manual.md.checkpoint.json");

    let failing = Arc::new(
        MockClient::new().failing((7, 8), vec![ConvertError::rejected("payload too large")]),
    );
    let store = FileCheckpoint::new(&path, fingerprint(2));
    assert_err!(convert_pages(pages(10), &config(2, 1), failing, &store).await);
    assert!(path.exists());

    // a new process: fresh store over the same file
    let client = Arc::new(MockClient::new());
    let store = FileCheckpoint::new(&path, fingerprint(2));
    let out = assert_ok!(convert_pages(pages(10), &config(2, 1), client.clone(), &store).await);

    assert_eq!(client.calls(), vec![(7, 8), (9, 10)]);
    assert_eq!(out.markdown, expected_document(10, 2));
}

#[tokio::test]
async fn file_checkpoint_for_other_chunking_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cp.json");

    let store = FileCheckpoint::new(&path, fingerprint(2));
    assert_ok!(convert_pages(pages(10), &config(2, 2), Arc::new(MockClient::new()), &store).await);

    let client = Arc::new(MockClient::new());
    let store = FileCheckpoint::new(&path, fingerprint(5));
    let out = assert_ok!(convert_pages(pages(10), &config(5, 2), client.clone(), &store).await);

    assert_eq!(client.calls().len(), 2);
    assert_eq!(out.markdown, expected_document(10, 5));
}
