//! Remote chat completions over `/chat/completions`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::client::{ClientError, OpenAiClient};
use crate::answer::engine::{ChatModel, GenerationError};
use crate::answer::prompt::ChatPrompt;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

impl From<ClientError> for GenerationError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Timeout => GenerationError::Timeout,
            ClientError::Unreachable(msg) => GenerationError::Unreachable(msg),
            ClientError::Status { status: 429, .. } => GenerationError::RateLimited,
            ClientError::Status { status, body } => GenerationError::Http { status, body },
            ClientError::Deserialize(msg) => GenerationError::MalformedResponse(msg),
            ClientError::Build(msg) => GenerationError::Unreachable(msg),
        }
    }
}

pub struct OpenAiChatModel {
    client: OpenAiClient,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(client: OpenAiClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, GenerationError> {
        if !self.client.has_api_key() {
            return Err(GenerationError::ApiKeyMissing);
        }

        let body = chat_request(&self.model, self.temperature, prompt);
        let response = self.client.post_json("chat/completions", &body).await?;
        let content = parse_chat_response(&response)?;

        debug!(
            model = %self.model,
            finish_reason = %response["choices"][0]["finish_reason"].as_str().unwrap_or("unknown"),
            "Chat completion"
        );
        Ok(content)
    }
}

pub fn chat_request(model: &str, temperature: f32, prompt: &ChatPrompt) -> Value {
    json!({
        "model": model,
        "temperature": temperature,
        "messages": prompt.messages(),
    })
}

/// Answer text from `choices[0].message.content`.
pub fn parse_chat_response(response: &Value) -> Result<String, GenerationError> {
    let choice = response["choices"].get(0)
        .ok_or_else(|| GenerationError::MalformedResponse("no choices in response".to_string()))?;

    match &choice["message"]["content"] {
        Value::String(content) if !content.trim().is_empty() => Ok(content.clone()),
        Value::String(_) | Value::Null => Err(GenerationError::EmptyResponse),
        other => Err(GenerationError::MalformedResponse(format!("unexpected content: {}", other))),
    }
}
