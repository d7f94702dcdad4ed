use crate::lexical::Bm25Index;
use crate::store::IndexSnapshot;
use crate::traits::VectorIndex;
use crate::{RetrievalHit, SearchError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Weight of the BM25 score in `semantic + weight * lexical`. A fixed design
/// constant; the two score ranges are not calibrated against each other.
pub const LEXICAL_WEIGHT: f64 = 0.2;

/// Semantic candidates fetched per requested hit when re-ranking.
pub const RERANK_POOL_FACTOR: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub top_k: usize,
    pub rerank: bool,
    pub max_chars: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            rerank: true,
            max_chars: 6_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub context: String,
    pub hits: Vec<RetrievalHit>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// BM25 model built over one loaded snapshot of the store.
struct LexicalModel {
    snapshot: Arc<IndexSnapshot>,
    index: Arc<Bm25Index>,
}

/// Semantic search re-ranked with BM25, deduplicated per page and trimmed to a
/// character budget.
pub struct HybridRetriever<V> {
    store: V,
    lexical: Mutex<Option<LexicalModel>>,
}

impl<V: VectorIndex> HybridRetriever<V> {
    pub fn new(store: V) -> Self {
        Self {
            store,
            lexical: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &V {
        &self.store
    }

    pub fn get_context(
        &self,
        question: &str,
        options: ContextOptions,
    ) -> Result<RetrievedContext, SearchError> {
        if options.top_k == 0 {
            return Err(SearchError::Request("top_k must be positive".to_string()));
        }

        let pool = if options.rerank {
            options.top_k.saturating_mul(RERANK_POOL_FACTOR)
        } else {
            options.top_k
        };
        let mut hits = self.store.search(question, pool)?;

        if options.rerank && !hits.is_empty() {
            if let Some(lexical) = self.lexical_model()? {
                let scores = lexical.scores(question);
                for hit in &mut hits {
                    hit.lex_score = scores.get(hit.row).copied().unwrap_or(0.0);
                }
                hits.sort_by(|left, right| {
                    right
                        .hybrid_score(LEXICAL_WEIGHT)
                        .total_cmp(&left.hybrid_score(LEXICAL_WEIGHT))
                });
            }
        }

        let hits = select_hits(hits, options.top_k, options.max_chars);
        debug!(question, kept = hits.len(), "context assembled");

        Ok(RetrievedContext {
            context: format_context(&hits),
            hits,
        })
    }

    /// BM25 model over every stored text. Reused only while the store hands out
    /// the same snapshot; any write or reset yields a new one.
    fn lexical_model(&self) -> Result<Option<Arc<Bm25Index>>, SearchError> {
        let Some(snapshot) = self.store.snapshot()? else {
            *self.lexical.lock().unwrap_or_else(PoisonError::into_inner) = None;
            return Ok(None);
        };

        let mut cached = self.lexical.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = cached.as_ref() {
            if Arc::ptr_eq(&model.snapshot, &snapshot) {
                return Ok(Some(Arc::clone(&model.index)));
            }
        }

        let index = Arc::new(Bm25Index::build(&snapshot.documents));
        debug!(rows = snapshot.len(), "lexical model built");
        *cached = Some(LexicalModel {
            snapshot,
            index: Arc::clone(&index),
        });
        Ok(Some(index))
    }
}

/// Keeps the first hit per (source_name, page) in ranked order, stops before
/// the first hit that would push the text total past `max_chars`, and returns
/// at most `top_k` hits.
pub fn select_hits(ranked: Vec<RetrievalHit>, top_k: usize, max_chars: usize) -> Vec<RetrievalHit> {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    let mut kept = Vec::new();

    for hit in ranked {
        if kept.len() >= top_k {
            break;
        }
        let key = (hit.metadata.source_name.clone(), hit.metadata.page);
        if !seen.insert(key) {
            continue;
        }
        let length = hit.text.chars().count();
        if total + length > max_chars {
            break;
        }
        total += length;
        kept.push(hit);
    }

    kept
}

pub fn format_context(hits: &[RetrievalHit]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "[source: {}, page: {}]\n{}",
                hit.metadata.source_name, hit.metadata.page, hit.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
