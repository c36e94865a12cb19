//! Engine error taxonomy.
//!
//! Errors that cross component boundaries inside the indexing and retrieval
//! engine. Cycle-level code contains these per source or per batch and keeps
//! going; only configuration problems abort a command.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The vector search engine cannot be used. Retrieval degrades to
    /// live-only sections; the indexer goes impaired instead of crashing.
    #[error("vector search unavailable: {0}")]
    EngineUnavailable(String),

    /// A single unit could not be read during enumeration. Logged and
    /// skipped; the cycle continues.
    #[error("failed to enumerate {unit}: {reason}")]
    Enumeration { unit: String, reason: String },

    /// One embedding sub-batch failed. Only its own chunks lose their
    /// vectors; sibling batches are unaffected.
    #[error("embedding sub-batch {batch} failed: {reason}")]
    EmbeddingBatch { batch: usize, reason: String },

    /// A source's commit failed. Its fingerprint stays un-advanced so the
    /// source is retried next cycle.
    #[error("commit failed for {source_ref}: {reason}")]
    Persistence { source_ref: String, reason: String },

    /// The chat completion provider failed. Returned to the caller as a
    /// descriptive string, never an unhandled panic.
    #[error("chat provider error: {0}")]
    Provider(String),
}
