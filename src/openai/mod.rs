//! OpenAI-compatible Backends
//!
//! HTTP implementations of [`Embedder`](crate::documents::Embedder) and
//! [`ChatModel`](crate::answer::ChatModel).

pub mod chat;
pub mod client;
pub mod embeddings;

pub use chat::{OpenAiChatModel, DEFAULT_CHAT_MODEL, DEFAULT_TEMPERATURE};
pub use client::{ClientError, OpenAiClient, DEFAULT_BASE_URL};
pub use embeddings::{OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, DEFAULT_MAX_INPUT_TOKENS};
