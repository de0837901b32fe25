//! Document Management Module
//!
//! Handles document loading, chunking, embedding, indexing and retrieval.

pub mod chunker;
pub mod embeddings;
pub mod index;
pub mod loader;
pub mod retriever;

// Re-export key public types
pub use chunker::{Chunk, ChunkedDocument, Chunker, ChunkerConfig, ChunkerError, DocumentHandling};
pub use embeddings::{cosine_similarity, Embedder, Embedding, EmbeddingError, HashingEmbedder};
pub use index::{IndexError, RetrievalResult, ScoredChunk, VectorIndex};
pub use loader::{Document, DocumentId, DocumentLoader, FileLoader, LoadError};
pub use retriever::{Retriever, RetrieverError};
