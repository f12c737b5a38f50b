//! Gemini `embedContent` client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::{Error, Result};
use super::Embedder;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Option<Embedding>,
}

#[derive(Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

pub struct GeminiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    dim: usize,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("embedding api key is not set".into()))?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("embedding http client: {e}")))?;
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };
        let endpoint = format!("{}/{model}:embedContent", config.url.trim_end_matches('/'));
        Ok(Self { client, endpoint, model, api_key, dim: config.dimension })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn name(&self) -> &str {
        "gemini"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbedRequest {
            model: &self.model,
            content: Content { parts: [Part { text }] },
            task_type: "SEMANTIC_SIMILARITY",
            output_dimensionality: self.dim,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("gemini unreachable: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::EmbeddingUnavailable(format!("gemini returned {status}")));
        }
        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("gemini response: {e}")))?;
        payload
            .embedding
            .map(|e| e.values)
            .ok_or_else(|| Error::EmbeddingUnavailable("gemini response had no embedding".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        assert!(matches!(GeminiEmbedder::new(&EmbeddingConfig::default()), Err(Error::Config(_))));
    }

    #[test]
    fn test_endpoint_and_body() {
        let config = EmbeddingConfig { api_key: Some("k".into()), model: "embedding-001".into(), ..Default::default() };
        let e = GeminiEmbedder::new(&config).unwrap();
        assert_eq!(
            e.endpoint,
            "https://generativelanguage.googleapis.com/v1beta/models/embedding-001:embedContent"
        );
        let body = EmbedRequest {
            model: &e.model,
            content: Content { parts: [Part { text: "hi" }] },
            task_type: "SEMANTIC_SIMILARITY",
            output_dimensionality: 768,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["content"]["parts"][0]["text"], "hi");
        assert_eq!(json["taskType"], "SEMANTIC_SIMILARITY");
    }
}
