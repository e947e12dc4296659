//! Chunked, resumable batch conversion.
//!
//! ```text
//! Vec<Page> ──plan──▶ Vec<Chunk> ──coordinator──▶ BTreeMap<index, md> ──assemble──▶ String
//!                                    │    ▲
//!                              processor  checkpoint
//! ```

pub mod assemble;
pub mod checkpoint;
pub mod coordinator;
pub mod plan;
pub mod processor;

pub use assemble::assemble;
pub use checkpoint::{checkpoint_path, CheckpointStore, FileCheckpoint, Fingerprint, MemoryCheckpoint};
pub use coordinator::{run_batch, BatchRun, CancellationFlag};
pub use plan::{build_chunks, plan_chunks, Chunk, ChunkSpan};
pub use processor::{failed_page_marker, ChunkOutcome, ChunkProcessor, ChunkStrategy, UnitOutput};
