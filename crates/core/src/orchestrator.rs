use crate::answer::{Answer, AnswerGenerator};
use crate::retriever::{ContextOptions, HybridRetriever};
use crate::traits::VectorIndex;
use crate::{RetrievalHit, SearchError};
use tracing::info;

#[derive(Debug, Clone)]
pub enum AskOutcome {
    /// Nothing has been indexed yet.
    NoIndex,
    Answered {
        answer: Answer,
        hits: Vec<RetrievalHit>,
    },
}

/// Question → context → answer.
pub struct AskCoordinator<V, A> {
    retriever: HybridRetriever<V>,
    generator: A,
}

impl<V, A> AskCoordinator<V, A>
where
    V: VectorIndex,
    A: AnswerGenerator,
{
    pub fn new(store: V, generator: A) -> Self {
        Self {
            retriever: HybridRetriever::new(store),
            generator,
        }
    }

    pub fn retriever(&self) -> &HybridRetriever<V> {
        &self.retriever
    }

    pub fn ask(&self, question: &str, options: ContextOptions) -> Result<AskOutcome, SearchError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SearchError::Request("question is empty".to_string()));
        }
        if !self.retriever.store().exists() {
            return Ok(AskOutcome::NoIndex);
        }

        let retrieved = self.retriever.get_context(question, options)?;
        let answer = self.generator.answer(question, &retrieved.context);
        info!(
            hits = retrieved.hits.len(),
            context_chars = retrieved.context.chars().count(),
            provenance = answer.provenance.label(),
            "question answered"
        );

        Ok(AskOutcome::Answered {
            answer,
            hits: retrieved.hits,
        })
    }
}
