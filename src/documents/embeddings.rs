//! Embeddings
//!
//! The [`Embedder`] contract maps text to fixed-dimension vectors. Remote
//! backends live in [`crate::openai`]; [`HashingEmbedder`] is a local,
//! dependency-free fallback using feature hashing. It is stable: the same text
//! always produces the same vector regardless of what else has been embedded.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Default dimensionality of [`HashingEmbedder`] vectors.
pub const HASHING_DIM: usize = 256;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Input too long: {tokens} tokens (max {max})")]
    InputTooLong { tokens: usize, max: usize },
    #[error("Embedding backend unreachable: {0}")]
    Unreachable(String),
    #[error("Embedding request timed out")]
    Timeout,
    #[error("Embedding backend error {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Embedding generation failed: {0}")]
    GenerationFailed(String),
}

impl Serialize for EmbeddingError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Embedding vector
pub type Embedding = Vec<f32>;

/// Maps text to vectors of a fixed dimensionality.
///
/// `embed` must be deterministic for a given model and input. `embed_many`
/// returns vectors in input order; batching is an optimization only.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model name/version, which determines the dimensionality.
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Local embedder using the hashing trick over lowercase word tokens.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model: String,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(HASHING_DIM)
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model: format!("feature-hash-v1-{}", dimensions),
        }
    }

    /// Hash a token to a bucket index in `[0, dimensions)`.
    fn hash_token(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions
    }

    /// Term-frequency vector via feature hashing, L2-normalized.
    ///
    /// Text with no alphanumeric tokens yields the zero vector.
    pub fn generate_embedding(&self, text: &str) -> Embedding {
        let mut tf = vec![0.0f32; self.dimensions];

        let tokens = text.split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|t| !t.is_empty());
        for token in tokens {
            let idx = self.hash_token(&token.to_lowercase());
            tf[idx] += 1.0;
        }

        normalize(&mut tf);
        tf
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        Ok(self.generate_embedding(text))
    }
}

/// Euclidean norm
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale to unit length in place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Calculate cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
