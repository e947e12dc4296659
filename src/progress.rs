//! Progress-callback trait for per-chunk batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive events
//! while the coordinator works through the chunks. The CLI renders them as
//! an `indicatif` progress bar plus one log line per chunk; library callers
//! can forward them anywhere.
//!
//! # Example
//!
//! ```rust
//! use chunked_pdf2md::{BatchConfig, BatchProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, index: usize, total: usize, _len: usize, _subdivided: bool) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("chunk {}/{} done ({done} so far)", index + 1, total);
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch coordinator and chunk processor.
///
/// Chunk indices are 0-based; page numbers are 1-based. Events for
/// different chunks may interleave and arrive from concurrent workers, so
/// implementations must synchronise their own state.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any chunk is dispatched.
    ///
    /// `pending` excludes chunks restored from the checkpoint.
    fn on_batch_start(&self, total_chunks: usize, pending: usize) {
        let _ = (total_chunks, pending);
    }

    /// A chunk was found in the checkpoint and will not be resubmitted.
    fn on_chunk_resumed(&self, index: usize, total_chunks: usize) {
        let _ = (index, total_chunks);
    }

    /// A worker picked up a chunk.
    fn on_chunk_start(&self, index: usize, total_chunks: usize, first_page: usize, last_page: usize) {
        let _ = (index, total_chunks, first_page, last_page);
    }

    /// The whole-chunk request failed and the chunk is being split.
    fn on_chunk_subdivided(&self, index: usize, pages: usize, sub_unit_pages: usize) {
        let _ = (index, pages, sub_unit_pages);
    }

    /// A single page failed on its own and was replaced by a placeholder.
    fn on_page_failed(&self, index: usize, page: usize, error: &str) {
        let _ = (index, page, error);
    }

    /// A chunk produced its Markdown and was checkpointed.
    fn on_chunk_complete(&self, index: usize, total_chunks: usize, markdown_len: usize, subdivided: bool) {
        let _ = (index, total_chunks, markdown_len, subdivided);
    }

    /// A chunk failed irrecoverably; the batch is aborting.
    fn on_chunk_error(&self, index: usize, total_chunks: usize, error: &str) {
        let _ = (index, total_chunks, error);
    }

    /// Called once when the coordinator stops, successfully or not.
    ///
    /// `completed_chunks < total_chunks` means the batch aborted or was
    /// cancelled.
    fn on_batch_complete(&self, completed_chunks: usize, total_chunks: usize) {
        let _ = (completed_chunks, total_chunks);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        resumed: AtomicUsize,
        completes: AtomicUsize,
        page_failures: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_chunk_resumed(&self, _index: usize, _total: usize) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_failed(&self, _index: usize, _page: usize, _error: &str) {
            self.page_failures.fetch_add(1, Ordering::SeqCst);
        }

        fn on_chunk_complete(&self, _index: usize, _total: usize, _len: usize, _subdivided: bool) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(3, 2);
        cb.on_chunk_resumed(0, 3);
        cb.on_chunk_start(1, 3, 26, 50);
        cb.on_chunk_subdivided(1, 25, 12);
        cb.on_page_failed(1, 30, "timeout");
        cb.on_chunk_complete(1, 3, 42, true);
        cb.on_chunk_error(2, 3, "rejected");
        cb.on_batch_complete(2, 3);
    }

    #[test]
    fn tracking_callback_through_arc_dyn() {
        let tracker = Arc::new(TrackingCallback::default());
        let cb: ProgressCallback = tracker.clone();

        cb.on_chunk_resumed(0, 2);
        cb.on_page_failed(1, 7, "boom");
        cb.on_chunk_complete(1, 2, 100, true);

        assert_eq!(tracker.resumed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.page_failures.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
    }
}
