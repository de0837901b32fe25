// Docqa Library
// Exports the question answering pipeline for the CLI binary and embedders

pub mod answer;
pub mod config;
pub mod context;
pub mod documents;
pub mod openai;
pub mod pipeline;

// Re-export commonly used types
pub use answer::{
    Answer, AnswerEngine, ChatModel, ChatPrompt, GenerationError, PromptAssembler,
    CONFIDENCE_THRESHOLD, NOT_AVAILABLE,
};
pub use config::{ConfigError, Credentials, EmbeddingProvider, QaConfig};
pub use context::tokens::{Cl100kTokenizer, TokenLength};
pub use documents::{
    Chunk, ChunkedDocument, Chunker, ChunkerConfig, Document, DocumentHandling, DocumentLoader,
    Embedder, EmbeddingError, FileLoader, HashingEmbedder, IndexError, LoadError, RetrievalResult,
    Retriever, VectorIndex,
};
pub use openai::{OpenAiChatModel, OpenAiClient, OpenAiEmbedder};
pub use pipeline::{DocumentSession, PipelineError, QaPipeline, QuestionOutcome, Stage};
