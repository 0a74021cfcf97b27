use std::collections::HashMap;
use std::sync::Arc;

use folio_llm::LlmProvider;
use folio_search::similarity::cosine_similarity;
use folio_search::{SearchError, SemanticMatch, SemanticRanker};

use crate::error::KnowledgeError;
use crate::repository::{BoxFuture, EmbeddingProvider};

/// [`EmbeddingProvider`] backed by an LLM provider's embedding endpoint.
pub struct LlmEmbeddings<P> {
    provider: Arc<P>,
}

impl<P: LlmProvider> LlmEmbeddings<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

impl<P: LlmProvider> EmbeddingProvider for LlmEmbeddings<P> {
    fn embed_texts<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, KnowledgeError>> {
        Box::pin(async move {
            if !self.provider.supports_embeddings() {
                return Err(KnowledgeError::Embedding(format!(
                    "provider {} does not support embeddings",
                    self.provider.name()
                )));
            }
            let vectors = self.provider.embed_batch(texts).await?;
            if vectors.len() != texts.len() {
                return Err(KnowledgeError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    vectors.len()
                )));
            }
            Ok(vectors)
        })
    }
}

/// Semantic ranker over precomputed record embeddings.
///
/// The query is embedded on every call; records without a stored vector are
/// skipped.
pub struct EmbeddingRanker {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingRanker {
    #[must_use]
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, vectors: HashMap<String, Vec<f32>>) -> Self {
        Self { embedder, vectors }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl SemanticRanker for EmbeddingRanker {
    fn score<'a>(
        &'a self,
        query: &'a str,
        candidate_ids: &'a [String],
    ) -> folio_search::searcher::BoxFuture<'a, Result<Vec<SemanticMatch>, SearchError>> {
        Box::pin(async move {
            let input = [query.to_owned()];
            let query_vector = self
                .embedder
                .embed_texts(&input)
                .await
                .map_err(|e| SearchError::Embedding(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| SearchError::Embedding("empty embedding response".into()))?;

            Ok(candidate_ids
                .iter()
                .filter_map(|id| {
                    let vector = self.vectors.get(id)?;
                    Some(SemanticMatch {
                        id: id.clone(),
                        score: cosine_similarity(&query_vector, vector).max(0.0),
                    })
                })
                .collect())
        })
    }
}
