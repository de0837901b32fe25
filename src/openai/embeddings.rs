//! Remote embeddings over `/embeddings`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::client::{ClientError, OpenAiClient};
use crate::context::TokenLength;
use crate::documents::embeddings::{Embedder, Embedding, EmbeddingError};

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 8191;

impl From<ClientError> for EmbeddingError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Timeout => EmbeddingError::Timeout,
            ClientError::Unreachable(msg) => EmbeddingError::Unreachable(msg),
            ClientError::Status { status, body } => EmbeddingError::Backend { status, body },
            ClientError::Deserialize(msg) => EmbeddingError::MalformedResponse(msg),
            ClientError::Build(msg) => EmbeddingError::Unreachable(msg),
        }
    }
}

pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
    dimensions: usize,
    batch_size: usize,
    max_input_tokens: usize,
    tokens: Arc<dyn TokenLength>,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAiClient, model: &str, dimensions: usize, tokens: Arc<dyn TokenLength>) -> Self {
        Self {
            client,
            model: model.to_string(),
            dimensions,
            batch_size: crate::documents::index::DEFAULT_BATCH_SIZE,
            max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
            tokens,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
        self.max_input_tokens = max_input_tokens;
        self
    }

    /// Reject any input the backend would refuse for length.
    fn check_capacity(&self, texts: &[String]) -> Result<(), EmbeddingError> {
        for text in texts {
            let tokens = self.tokens.length(text);
            if tokens > self.max_input_tokens {
                return Err(EmbeddingError::InputTooLong { tokens, max: self.max_input_tokens });
            }
        }
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        let body = embeddings_request(&self.model, self.dimensions, texts);
        let response = self.client.post_json("embeddings", &body).await?;
        parse_embeddings_response(&response, texts.len(), self.dimensions)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors.pop()
            .ok_or_else(|| EmbeddingError::MalformedResponse("no embedding returned".to_string()))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        self.check_capacity(texts)?;

        // The API rejects blank input, so those slots get the zero vector
        let mut out: Vec<Embedding> = vec![Vec::new(); texts.len()];
        let pending: Vec<usize> = (0..texts.len())
            .filter(|&i| !texts[i].trim().is_empty())
            .collect();
        for (i, slot) in out.iter_mut().enumerate() {
            if texts[i].trim().is_empty() {
                *slot = vec![0.0; self.dimensions];
            }
        }

        for batch in pending.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.embed_batch(&inputs).await?;
            for (&i, vector) in batch.iter().zip(vectors) {
                out[i] = vector;
            }
        }

        debug!(model = %self.model, inputs = texts.len(), requests = pending.len().div_ceil(self.batch_size), "Embedded batch");
        Ok(out)
    }
}

/// Request body for `/embeddings`. Only `text-embedding-3` models accept a
/// `dimensions` override.
pub fn embeddings_request(model: &str, dimensions: usize, inputs: &[String]) -> Value {
    let mut body = json!({
        "model": model,
        "input": inputs,
        "encoding_format": "float",
    });
    if model.starts_with("text-embedding-3") {
        body["dimensions"] = json!(dimensions);
    }
    body
}

/// Extract vectors from an `/embeddings` response, ordered by their `index`.
pub fn parse_embeddings_response(
    response: &Value,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Embedding>, EmbeddingError> {
    let data = response["data"].as_array()
        .ok_or_else(|| EmbeddingError::MalformedResponse("missing data array".to_string()))?;

    let mut indexed: Vec<(usize, Embedding)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(position);
        let values = item["embedding"].as_array()
            .ok_or_else(|| EmbeddingError::MalformedResponse(format!("item {} has no embedding", position)))?;
        let vector: Embedding = values.iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<_>>()
            .ok_or_else(|| EmbeddingError::MalformedResponse(format!("item {} has non-numeric values", position)))?;

        if vector.len() != dimensions {
            return Err(EmbeddingError::DimensionMismatch { expected: dimensions, actual: vector.len() });
        }
        indexed.push((index, vector));
    }

    if indexed.len() != expected {
        return Err(EmbeddingError::MalformedResponse(format!(
            "expected {} embeddings, got {}",
            expected,
            indexed.len()
        )));
    }

    indexed.sort_by_key(|(index, _)| *index);
    if indexed.iter().enumerate().any(|(i, (index, _))| i != *index) {
        return Err(EmbeddingError::MalformedResponse("embedding indices are not contiguous".to_string()));
    }

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct WordLength;

    impl TokenLength for WordLength {
        fn scheme(&self) -> &str {
            "words"
        }

        fn length(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn embedder(max_input_tokens: usize) -> OpenAiEmbedder {
        // Unroutable base URL: any request that slips through fails fast
        let client = OpenAiClient::new("http://127.0.0.1:0", "", Duration::from_millis(50)).unwrap();
        OpenAiEmbedder::new(client, DEFAULT_EMBEDDING_MODEL, 3, Arc::new(WordLength))
            .with_max_input_tokens(max_input_tokens)
    }

    #[test]
    fn test_request_shape() {
        let body = embeddings_request("text-embedding-3-small", 512, &["a".to_string(), "b".to_string()]);
        assert_eq!(body["model"], "text-embedding-3-small");
        assert_eq!(body["input"], json!(["a", "b"]));
        assert_eq!(body["dimensions"], 512);

        let legacy = embeddings_request("text-embedding-ada-002", 1536, &["a".to_string()]);
        assert!(legacy.get("dimensions").is_none());
    }

    #[test]
    fn test_parse_reorders_by_index() {
        let response = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] },
            ]
        });
        let vectors = parse_embeddings_response(&response, 2, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_rejects_wrong_dimensions() {
        let response = json!({ "data": [{ "index": 0, "embedding": [1.0, 0.0, 0.0] }] });
        let err = parse_embeddings_response(&response, 1, 2).unwrap_err();
        assert!(matches!(err, EmbeddingError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_parse_rejects_missing_items() {
        let response = json!({ "data": [{ "index": 0, "embedding": [1.0] }] });
        assert!(matches!(
            parse_embeddings_response(&response, 2, 1),
            Err(EmbeddingError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_embeddings_response(&json!({ "error": "nope" }), 1, 1),
            Err(EmbeddingError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_client_error_mapping() {
        let err: EmbeddingError = ClientError::Status { status: 503, body: "down".to_string() }.into();
        assert!(matches!(err, EmbeddingError::Backend { status: 503, .. }));
        assert!(matches!(EmbeddingError::from(ClientError::Timeout), EmbeddingError::Timeout));
        assert!(matches!(
            EmbeddingError::from(ClientError::Build("tls".to_string())),
            EmbeddingError::Unreachable(_)
        ));
    }

    #[tokio::test]
    async fn test_input_too_long_is_rejected_before_request() {
        let err = embedder(3).embed("one two three four").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InputTooLong { tokens: 4, max: 3 }));
    }

    #[tokio::test]
    async fn test_blank_inputs_need_no_request() {
        let vectors = embedder(10)
            .embed_many(&["".to_string(), "  \n".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.0; 3], vec![0.0; 3]]);
    }
}
