//! Document Retrieval
//!
//! Fixed top-k policy over a [`VectorIndex`]: embed the question, query the
//! index, return the result as-is. Nothing is cached between calls.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::embeddings::{Embedder, EmbeddingError};
use super::index::{IndexError, RetrievalResult, VectorIndex};

/// Default number of chunks retrieved per question
pub const DEFAULT_TOP_K: usize = 7;

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl Serialize for RetrieverError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retriever {
    top_k: usize,
}

impl Default for Retriever {
    fn default() -> Self {
        Self { top_k: DEFAULT_TOP_K }
    }
}

impl Retriever {
    pub fn new(top_k: usize) -> Self {
        Self { top_k: top_k.max(1) }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
        embedder: &dyn Embedder,
    ) -> Result<RetrievalResult, RetrieverError> {
        let query_vector = embedder.embed(query).await?;
        let result = index.query(&query_vector, self.top_k)?;
        debug!(top_k = self.top_k, hits = result.len(), "Retrieved chunks");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::chunker::Chunk;
    use crate::documents::embeddings::HashingEmbedder;
    use crate::documents::loader::Document;

    async fn index_of(texts: &[&str]) -> VectorIndex {
        let doc = Document::new("doc.txt", texts.join(""));
        let chunks = texts.iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                index,
                document: doc.id().clone(),
                text: text.to_string(),
                start: 0,
                end: text.len(),
                token_count: 0,
            })
            .collect();
        VectorIndex::build(chunks, &HashingEmbedder::default(), 16).await.unwrap()
    }

    #[test]
    fn test_default_top_k() {
        assert_eq!(Retriever::default().top_k(), 7);
        assert_eq!(Retriever::new(0).top_k(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_most_relevant_first() {
        let index = index_of(&[
            "Rust ownership rules prevent data races.",
            "The capital of France is Paris.",
            "Tokyo is the largest city in Japan.",
        ])
        .await;

        let result = Retriever::new(2)
            .retrieve(&index, "What is the capital of France?", &HashingEmbedder::default())
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.hits[0].chunk.index, 1);
    }

    #[tokio::test]
    async fn test_retrieve_caps_at_chunk_count() {
        let index = index_of(&["one chunk only"]).await;
        let result = Retriever::default()
            .retrieve(&index, "chunk", &HashingEmbedder::default())
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_surfaces_as_index_error() {
        let index = index_of(&["some text"]).await;
        let err = Retriever::default()
            .retrieve(&index, "text", &HashingEmbedder::new(8))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrieverError::Index(IndexError::DimensionMismatch { .. })));
    }
}
