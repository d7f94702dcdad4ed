use crate::store::IndexSnapshot;
use crate::{ChunkRecord, RetrievalHit, SearchError};
use std::sync::Arc;

/// Append-only searchable collection of chunks.
pub trait VectorIndex {
    fn exists(&self) -> bool;

    /// Embeds and appends `records` as one logical unit.
    fn add_batch(&self, records: &[ChunkRecord]) -> Result<(), SearchError>;

    /// Best-first hits by cosine similarity. Empty when the index does not exist.
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalHit>, SearchError>;

    /// Every stored row, or `None` when the index does not exist.
    fn snapshot(&self) -> Result<Option<Arc<IndexSnapshot>>, SearchError>;

    /// Drops every persisted row; the index reports "does not exist" until the next append.
    fn reset(&self) -> Result<(), SearchError>;
}
