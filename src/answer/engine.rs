//! Answer Generation
//!
//! One chat completion per question. The model's text is returned unchanged,
//! including the [`NOT_AVAILABLE`](super::prompt::NOT_AVAILABLE) sentinel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::prompt::{ChatPrompt, NOT_AVAILABLE};

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("API key not configured")]
    ApiKeyMissing,
    #[error("Chat request timed out")]
    Timeout,
    #[error("Chat backend rate limited the request")]
    RateLimited,
    #[error("Chat backend unreachable: {0}")]
    Unreachable(String),
    #[error("Chat backend error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Malformed chat response: {0}")]
    MalformedResponse(String),
    #[error("Chat model returned an empty answer")]
    EmptyResponse,
}

impl Serialize for GenerationError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A chat model that turns an assembled prompt into answer text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, GenerationError>;
}

/// Model answer text, possibly the "Data Not Available" sentinel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Answer(String);

impl Answer {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// True when the model declined to answer from the context
    pub fn is_not_available(&self) -> bool {
        self.0.trim() == NOT_AVAILABLE
    }
}

impl std::fmt::Display for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct AnswerEngine {
    model: Arc<dyn ChatModel>,
}

impl AnswerEngine {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &str {
        self.model.model()
    }

    pub async fn generate(&self, prompt: &ChatPrompt) -> Result<Answer, GenerationError> {
        let text = self.model.complete(prompt).await?;
        if text.trim().is_empty() {
            warn!(model = %self.model.model(), "Chat model returned whitespace only");
            return Err(GenerationError::EmptyResponse);
        }

        let answer = Answer::new(text);
        debug!(
            model = %self.model.model(),
            not_available = answer.is_not_available(),
            chars = answer.as_str().len(),
            "Answer generated"
        );
        Ok(answer)
    }
}
