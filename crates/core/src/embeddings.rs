use crate::error::IngestError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError>;
}

/// General-purpose embedding backend (OpenAI-style `/v1/embeddings`).
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": text,
                "encoding_format": "float",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IngestError::Embedding(format!(
                "embedding request returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        let vector = collect_floats(parsed.pointer("/data/0/embedding"));

        if vector.is_empty() {
            return Err(IngestError::Embedding(
                "embedding response carried no vector".to_string(),
            ));
        }

        Ok(vector)
    }
}

/// Multimodal-provider embedding backend (Gemini `embedContent`).
pub struct GeminiEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl GeminiEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:embedContent",
                self.endpoint, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "content": { "parts": [{ "text": text }] },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IngestError::Embedding(format!(
                "embedding request returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        let vector = collect_floats(parsed.pointer("/embedding/values"));

        if vector.is_empty() {
            return Err(IngestError::Embedding(
                "embedding response carried no vector".to_string(),
            ));
        }

        Ok(vector)
    }
}

fn collect_floats(value: Option<&Value>) -> Vec<f32> {
    value
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .map(|number| number as f32)
                .collect()
        })
        .unwrap_or_default()
}
