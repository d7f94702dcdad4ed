use crate::embeddings::{l2_normalize, Embedder, EmbeddingProvider};
use crate::error::{ProviderError, SearchError};
use crate::store::{EmbeddingMatrix, IndexFiles, IndexSnapshot};
use crate::traits::VectorIndex;
use crate::{ChunkRecord, RetrievalHit};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Read-through copy of the persisted rows. Emptied by every write.
#[derive(Default)]
struct IndexCache {
    slot: RwLock<Option<Arc<IndexSnapshot>>>,
}

impl IndexCache {
    fn ensure_loaded(&self, files: &IndexFiles) -> Result<Arc<IndexSnapshot>, SearchError> {
        if let Some(snapshot) = self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(snapshot));
        }

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(snapshot) = slot.as_ref() {
            return Ok(Arc::clone(snapshot));
        }

        let snapshot = Arc::new(files.load()?);
        debug!(dir = %files.dir().display(), rows = snapshot.len(), "index loaded");
        *slot = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn invalidate(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Brute-force cosine-similarity store persisted in one directory.
///
/// One writer per directory at a time; reads must not overlap a write.
pub struct FlatVectorStore<E = EmbeddingProvider> {
    files: IndexFiles,
    embedder: E,
    cache: IndexCache,
}

impl<E: Embedder> FlatVectorStore<E> {
    pub fn new(index_dir: impl Into<PathBuf>, embedder: E) -> Self {
        Self {
            files: IndexFiles::new(index_dir),
            embedder,
            cache: IndexCache::default(),
        }
    }

    pub fn index_dir(&self) -> &Path {
        self.files.dir()
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Number of stored rows; 0 when the index does not exist.
    pub fn len(&self) -> Result<usize, SearchError> {
        Ok(self.snapshot()?.map(|snapshot| snapshot.len()).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool, SearchError> {
        Ok(self.len()? == 0)
    }

    fn embed_normalized(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = self.embedder.embed(texts)?;
        if vectors.len() != texts.len() {
            return Err(ProviderError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            }
            .into());
        }
        for vector in &mut vectors {
            l2_normalize(vector);
        }
        Ok(vectors)
    }
}

impl<E: Embedder> VectorIndex for FlatVectorStore<E> {
    fn exists(&self) -> bool {
        self.files.exists()
    }

    fn add_batch(&self, records: &[ChunkRecord]) -> Result<(), SearchError> {
        if records.is_empty() {
            return Ok(());
        }

        let texts = records
            .iter()
            .map(|record| record.text.as_str())
            .collect::<Vec<_>>();
        let vectors = EmbeddingMatrix::from_rows(self.embed_normalized(&texts)?)?;
        let owned_texts = records
            .iter()
            .map(|record| record.text.clone())
            .collect::<Vec<_>>();
        let metadata = records
            .iter()
            .map(|record| record.metadata.clone())
            .collect::<Vec<_>>();

        let written = self.files.append(&vectors, &owned_texts, &metadata);
        self.cache.invalidate();
        written?;

        debug!(rows = records.len(), dir = %self.files.dir().display(), "batch appended");
        Ok(())
    }

    fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalHit>, SearchError> {
        if top_k == 0 {
            return Err(SearchError::Request("top_k must be positive".to_string()));
        }
        let Some(snapshot) = self.snapshot()? else {
            return Ok(Vec::new());
        };
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embed_normalized(&[query])?
            .pop()
            .unwrap_or_default();
        if query_vector.len() != snapshot.embeddings.dim() {
            return Err(SearchError::DimensionMismatch {
                expected: snapshot.embeddings.dim(),
                actual: query_vector.len(),
            });
        }

        let scores = snapshot
            .embeddings
            .iter_rows()
            .map(|row| dot(row, &query_vector))
            .collect::<Vec<_>>();

        Ok(top_k_rows(&scores, top_k)
            .into_iter()
            .map(|row| RetrievalHit {
                row,
                text: snapshot.documents[row].clone(),
                metadata: snapshot.metadata[row].clone(),
                score: scores[row] as f64,
                lex_score: 0.0,
            })
            .collect())
    }

    fn snapshot(&self) -> Result<Option<Arc<IndexSnapshot>>, SearchError> {
        if !self.files.exists() {
            return Ok(None);
        }
        self.cache.ensure_loaded(&self.files).map(Some)
    }

    fn reset(&self) -> Result<(), SearchError> {
        let removed = self.files.remove();
        self.cache.invalidate();
        removed
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

/// Exact top-k row indices, best first; equal scores keep insertion order.
fn top_k_rows(scores: &[f32], top_k: usize) -> Vec<usize> {
    let ranking = |left: &usize, right: &usize| -> Ordering {
        scores[*right]
            .total_cmp(&scores[*left])
            .then_with(|| left.cmp(right))
    };

    let mut rows = (0..scores.len()).collect::<Vec<_>>();
    if top_k < rows.len() {
        rows.select_nth_unstable_by(top_k - 1, ranking);
        rows.truncate(top_k);
    }
    rows.sort_by(ranking);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::ChunkMetadata;

    fn record(text: &str, source: &str, page: u32) -> ChunkRecord {
        ChunkRecord {
            text: text.to_string(),
            metadata: ChunkMetadata::new(format!("/samples/{source}"), source, page),
        }
    }

    fn store(dir: &Path) -> FlatVectorStore<CharacterNgramEmbedder> {
        FlatVectorStore::new(dir.join("index"), CharacterNgramEmbedder::default())
    }

    /// Returns fixed vectors keyed by text, deliberately not normalized.
    struct TableEmbedder(Vec<(&'static str, Vec<f32>)>);

    impl Embedder for TableEmbedder {
        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts
                .iter()
                .map(|text| {
                    self.0
                        .iter()
                        .find(|(key, _)| key == text)
                        .map(|(_, vector)| vector.clone())
                        .unwrap_or_else(|| vec![0.0, 0.0])
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Err(ProviderError::Init("model download refused".to_string()))
        }
    }

    /// Drops the last vector of every batch.
    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn provider_failure_propagates_without_writing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = FlatVectorStore::new(dir.path().join("index"), FailingEmbedder);

        let result = store.add_batch(&[record("deductible of 500 euro", "a.pdf", 1)]);
        assert!(matches!(result, Err(SearchError::Provider(ProviderError::Init(_)))));
        assert!(!store.exists());
        assert!(store.snapshot()?.is_none());
        Ok(())
    }

    #[test]
    fn short_embedding_batch_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = FlatVectorStore::new(dir.path().join("index"), ShortEmbedder);

        let result = store.add_batch(&[
            record("deductible of 500 euro", "a.pdf", 1),
            record("glass breakage", "a.pdf", 2),
        ]);
        assert!(matches!(
            result,
            Err(SearchError::Provider(ProviderError::CountMismatch {
                expected: 2,
                actual: 1
            }))
        ));
        assert!(!store.exists());
        Ok(())
    }

    #[test]
    fn missing_index_searches_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        assert!(!store.exists());
        assert!(store.search("grace period", 5)?.is_empty());
        assert!(store.snapshot()?.is_none());
        assert_eq!(store.len()?, 0);
        Ok(())
    }

    #[test]
    fn distinctive_token_is_retrievable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        store.add_batch(&[
            record("The premium is payable every month by bank transfer.", "a.pdf", 1),
            record("Flood damage to the basement is excluded from cover.", "a.pdf", 2),
            record("Claims must be notified within thirty days.", "b.pdf", 1),
        ])?;
        store.add_batch(&[record(
            "Xylophone instruments are insured at market value.",
            "c.pdf",
            4,
        )])?;

        assert!(store.exists());
        assert_eq!(store.len()?, 4);

        let hits = store.search("xylophone", 2)?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.source_name, "c.pdf");
        assert_eq!(hits[0].row, 3);
        assert!(hits[0].score >= hits[1].score);
        Ok(())
    }

    #[test]
    fn stored_vectors_are_unit_length() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let embedder = TableEmbedder(vec![("a", vec![3.0, 4.0]), ("b", vec![0.0, 2.0])]);
        let store = FlatVectorStore::new(dir.path(), embedder);
        store.add_batch(&[record("a", "a.pdf", 1), record("b", "a.pdf", 2)])?;

        let snapshot = store.snapshot()?.ok_or("index should exist")?;
        for row in snapshot.embeddings.iter_rows() {
            let norm = row.iter().map(|value| value * value).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn results_are_ordered_with_stable_ties() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let embedder = TableEmbedder(vec![
            ("low", vec![0.0, 1.0]),
            ("tie-first", vec![1.0, 1.0]),
            ("best", vec![1.0, 0.0]),
            ("tie-second", vec![1.0, 1.0]),
            ("query", vec![1.0, 0.0]),
        ]);
        let store = FlatVectorStore::new(dir.path(), embedder);
        store.add_batch(&[
            record("low", "a.pdf", 1),
            record("tie-first", "a.pdf", 2),
            record("best", "a.pdf", 3),
            record("tie-second", "a.pdf", 4),
        ])?;

        let all = store.search("query", 10)?;
        let rows = all.iter().map(|hit| hit.row).collect::<Vec<_>>();
        assert_eq!(rows, vec![2, 1, 3, 0]);

        let partial = store.search("query", 2)?;
        let rows = partial.iter().map(|hit| hit.row).collect::<Vec<_>>();
        assert_eq!(rows, vec![2, 1]);
        Ok(())
    }

    #[test]
    fn writes_invalidate_the_cache() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        store.add_batch(&[record("deductible of 500 euro per claim", "a.pdf", 1)])?;
        assert_eq!(store.search("deductible", 5)?.len(), 1);

        store.add_batch(&[record("deductible waived for glass breakage", "a.pdf", 2)])?;
        assert_eq!(store.search("deductible", 5)?.len(), 2);
        Ok(())
    }

    #[test]
    fn reset_then_rebuild_yields_the_same_rows() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = store(dir.path());
        let corpus = [
            record("theft cover requires forced entry", "a.pdf", 1),
            record("fire cover includes smoke damage", "a.pdf", 2),
        ];

        store.add_batch(&corpus)?;
        let first = store.snapshot()?.ok_or("index should exist")?;

        store.reset()?;
        assert!(!store.exists());
        assert!(store.search("theft", 3)?.is_empty());

        store.add_batch(&corpus)?;
        let second = store.snapshot()?.ok_or("index should exist")?;
        assert_eq!(first.len(), second.len());
        assert_eq!(first.metadata, second.metadata);
        Ok(())
    }

    #[test]
    fn zero_top_k_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        assert!(matches!(
            store(dir.path()).search("anything", 0),
            Err(SearchError::Request(_))
        ));
        Ok(())
    }

    #[test]
    fn top_k_selection_matches_full_sort() {
        let scores = [0.1, 0.9, 0.5, 0.9, -0.3, 0.7, 0.5];
        assert_eq!(top_k_rows(&scores, 3), vec![1, 3, 5]);
        assert_eq!(top_k_rows(&scores, 7), vec![1, 3, 5, 2, 6, 0, 4]);
        assert_eq!(top_k_rows(&scores, 1), vec![1]);
    }
}
