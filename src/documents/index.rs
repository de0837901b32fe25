//! Vector Index
//!
//! Exact k-nearest-neighbor search over one document's chunk vectors.
//!
//! Similarity is cosine similarity. Vectors are L2-normalized once at build
//! time, so a query costs one dot product per chunk. At the scale of a single
//! document (hundreds to low thousands of chunks) this brute-force scan is
//! exact and fast enough.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, info};

use super::chunker::Chunk;
use super::embeddings::{l2_norm, normalize, Embedder, Embedding, EmbeddingError};

/// Default number of chunks embedded per backend call.
pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index queried before it was built")]
    NotBuilt,
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Chunk/vector count mismatch: {chunks} chunks, {vectors} vectors")]
    CountMismatch { chunks: usize, vectors: usize },
}

impl Serialize for IndexError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A retrieved chunk with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Up to k chunks ordered by descending similarity, ties by chunk index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredChunk> {
        self.hits.iter()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.hits.iter().map(|h| &h.chunk)
    }
}

struct IndexEntry {
    chunk: Chunk,
    /// Unit-length vector, or all zeros for degenerate input
    vector: Embedding,
    /// Zero-norm vectors (empty or whitespace chunks) always rank last
    degenerate: bool,
}

/// Chunk vectors for one document, owned for the duration of a session.
pub struct VectorIndex {
    dimensions: usize,
    model: String,
    entries: Vec<IndexEntry>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimensions", &self.dimensions)
            .field("model", &self.model)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl VectorIndex {
    /// Embed every chunk in batches of `batch_size` and index the results.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        let batch_size = batch_size.max(1);
        let mut vectors = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = embedder.embed_many(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(EmbeddingError::MalformedResponse(format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    embedded.len()
                )));
            }
            vectors.extend(embedded);
        }

        let index = Self::from_embeddings(embedder.model(), embedder.dimensions(), chunks, vectors)
            .map_err(|e| match e {
                IndexError::DimensionMismatch { expected, actual } => {
                    EmbeddingError::DimensionMismatch { expected, actual }
                }
                other => EmbeddingError::MalformedResponse(other.to_string()),
            })?;

        info!(model = %index.model, chunks = index.len(), dimensions = index.dimensions, "Index built");
        Ok(index)
    }

    /// Index pre-computed vectors. `vectors[i]` belongs to `chunks[i]`.
    pub fn from_embeddings(
        model: &str,
        dimensions: usize,
        chunks: Vec<Chunk>,
        vectors: Vec<Embedding>,
    ) -> Result<Self, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::CountMismatch { chunks: chunks.len(), vectors: vectors.len() });
        }

        let mut entries = Vec::with_capacity(chunks.len());
        for (chunk, mut vector) in chunks.into_iter().zip(vectors) {
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch { expected: dimensions, actual: vector.len() });
            }
            let degenerate = !(l2_norm(&vector) > 0.0);
            normalize(&mut vector);
            entries.push(IndexEntry { chunk, vector, degenerate });
        }

        Ok(Self {
            dimensions,
            model: model.to_string(),
            entries,
        })
    }

    /// Up to `k` nearest chunks to `vector` by cosine similarity.
    ///
    /// An empty index returns an empty result for any query.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(RetrievalResult::default());
        }
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch { expected: self.dimensions, actual: vector.len() });
        }

        let query_norm = l2_norm(vector);
        let mut scored: Vec<(&IndexEntry, f32)> = self.entries.iter()
            .map(|entry| {
                let score = if entry.degenerate || !(query_norm > 0.0) {
                    0.0
                } else {
                    let dot: f32 = entry.vector.iter().zip(vector).map(|(a, b)| a * b).sum();
                    dot / query_norm
                };
                (entry, score)
            })
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            a.degenerate.cmp(&b.degenerate)
                .then_with(|| sb.partial_cmp(sa).unwrap_or(Ordering::Equal))
                .then_with(|| a.chunk.index.cmp(&b.chunk.index))
        });
        scored.truncate(k);

        debug!(k, returned = scored.len(), "Index query");
        Ok(RetrievalResult {
            hits: scored.into_iter()
                .map(|(entry, score)| ScoredChunk { chunk: entry.chunk.clone(), score })
                .collect(),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::embeddings::HashingEmbedder;
    use crate::documents::loader::Document;

    fn chunk(index: usize, text: &str) -> Chunk {
        let doc = Document::new("doc.txt", "");
        Chunk {
            index,
            document: doc.id().clone(),
            text: text.to_string(),
            start: 0,
            end: text.len(),
            token_count: text.split_whitespace().count(),
        }
    }

    fn small_index() -> VectorIndex {
        let chunks = vec![chunk(0, "a"), chunk(1, "b"), chunk(2, "c")];
        let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.7, 0.7, 0.0]];
        VectorIndex::from_embeddings("test", 3, chunks, vectors).unwrap()
    }

    #[test]
    fn test_query_orders_by_similarity() {
        let result = small_index().query(&[1.0, 0.0, 0.0], 3).unwrap();
        let order: Vec<usize> = result.chunks().map(|c| c.index).collect();
        assert_eq!(order, vec![0, 2, 1]);
        assert!((result.hits[0].score - 1.0).abs() < 1e-5);
        assert!(result.hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_fewer_chunks_than_k() {
        let result = small_index().query(&[0.0, 1.0, 0.0], 7).unwrap();
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_truncates_to_k() {
        let result = small_index().query(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.hits[0].chunk.index, 1);
    }

    #[test]
    fn test_query_is_idempotent() {
        let index = small_index();
        let first = index.query(&[0.3, 0.5, 0.1], 2).unwrap();
        let second = index.query(&[0.3, 0.5, 0.1], 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ties_broken_by_chunk_order() {
        let chunks = vec![chunk(0, "x"), chunk(1, "y"), chunk(2, "z")];
        let vectors = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]];
        let index = VectorIndex::from_embeddings("test", 2, chunks, vectors).unwrap();

        let result = index.query(&[1.0, 0.0], 3).unwrap();
        let order: Vec<usize> = result.chunks().map(|c| c.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_empty_index_returns_empty_result() {
        let index = VectorIndex::from_embeddings("test", 3, Vec::new(), Vec::new()).unwrap();
        assert!(index.query(&[1.0, 0.0, 0.0], 7).unwrap().is_empty());
        // Even a malformed query is not an error on an empty index
        assert!(index.query(&[1.0], 7).unwrap().is_empty());
    }

    #[test]
    fn test_zero_vector_ranks_last() {
        let chunks = vec![chunk(0, "   "), chunk(1, "b"), chunk(2, "c")];
        let vectors = vec![vec![0.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
        let index = VectorIndex::from_embeddings("test", 2, chunks, vectors).unwrap();

        let result = index.query(&[1.0, 0.0], 3).unwrap();
        assert_eq!(result.hits.last().unwrap().chunk.index, 0);
        assert_eq!(result.hits[0].chunk.index, 1);
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = small_index().query(&[1.0, 0.0], 2).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 3, actual: 2 }));

        let bad = VectorIndex::from_embeddings("test", 3, vec![chunk(0, "a")], vec![vec![1.0]]);
        assert!(matches!(bad, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_count_mismatch() {
        let err = VectorIndex::from_embeddings("test", 1, vec![chunk(0, "a")], Vec::new()).unwrap_err();
        assert!(matches!(err, IndexError::CountMismatch { chunks: 1, vectors: 0 }));
    }

    #[tokio::test]
    async fn test_build_with_embedder() {
        let embedder = HashingEmbedder::default();
        let chunks = vec![
            chunk(0, "The capital of France is Paris."),
            chunk(1, "Bananas grow in tropical climates."),
            chunk(2, ""),
        ];
        let index = VectorIndex::build(chunks, &embedder, 2).await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.dimensions(), embedder.dimensions());

        let query = embedder.generate_embedding("capital of France");
        let result = index.query(&query, 3).unwrap();
        assert_eq!(result.hits[0].chunk.index, 0);
        assert_eq!(result.hits[2].chunk.index, 2);
    }

    #[tokio::test]
    async fn test_build_empty() {
        let index = VectorIndex::build(Vec::new(), &HashingEmbedder::default(), 8).await.unwrap();
        assert!(index.is_empty());
    }
}
