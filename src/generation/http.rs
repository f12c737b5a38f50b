//! HTTP text-generation backends.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{BackendConfig, BackendKind};
use crate::{Error, Result};
use super::TextGenerator;

/// Build the backend described by `config`.
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn TextGenerator>> {
    Ok(match config.kind {
        BackendKind::OpenAiCompatible => Arc::new(OpenAiCompatible::new(config)?),
        BackendKind::Gemini => Arc::new(GeminiGenerator::new(config)?),
    })
}

fn client(config: &BackendConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| Error::Config(format!("{} http client: {e}", config.name)))
}

fn api_key(config: &BackendConfig) -> Result<String> {
    config
        .api_key
        .clone()
        .ok_or_else(|| Error::Config(format!("backend '{}' has no api key", config.name)))
}

fn transport(name: &str, err: reqwest::Error) -> Error {
    let what = if err.is_timeout() { "timed out" } else { "unreachable" };
    Error::Unavailable(format!("{name} {what}: {err}"))
}

// ============================================================================
// OpenAI-compatible chat completions
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// `POST {url}` with a chat-completions body. `url` is the full endpoint.
pub struct OpenAiCompatible {
    name: String,
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatible {
    /// The key is optional here: local servers often need none.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            client: client(config)?,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn body<'a>(&'a self, system: &'a str, prompt: &'a str) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage { role: "system", content: system });
        }
        messages.push(ChatMessage { role: "user", content: prompt });
        ChatRequest { model: &self.model, messages, temperature: self.temperature, max_tokens: self.max_tokens }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let mut request = self.client.post(&self.url).json(&self.body(system, prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| transport(&self.name, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Unavailable(format!("{} returned {status}", self.name)));
        }
        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Unavailable(format!("{} response: {e}", self.name)))?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .ok_or_else(|| Error::Unavailable(format!("{} returned no choices", self.name)))
    }
}

// ============================================================================
// Gemini generateContent
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
    contents: [GeminiContent<'a>; 1],
    generation_config: GenerationParams,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [GeminiPart<'a>; 1],
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiReply>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiReply {
    #[serde(default)]
    parts: Vec<GeminiReplyPart>,
}

#[derive(Deserialize)]
struct GeminiReplyPart {
    #[serde(default)]
    text: String,
}

pub struct GeminiGenerator {
    name: String,
    client: Client,
    endpoint: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl GeminiGenerator {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let model = config.model.trim_start_matches("models/");
        Ok(Self {
            name: config.name.clone(),
            client: client(config)?,
            endpoint: format!("{}/models/{model}:generateContent", config.url.trim_end_matches('/')),
            api_key: api_key(config)?,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn body<'a>(&self, system: &'a str, prompt: &'a str) -> GeminiRequest<'a> {
        GeminiRequest {
            system_instruction: (!system.is_empty()).then_some(GeminiContent { role: None, parts: [GeminiPart { text: system }] }),
            contents: [GeminiContent { role: Some("user"), parts: [GeminiPart { text: prompt }] }],
            generation_config: GenerationParams {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                top_p: 0.95,
                top_k: 40,
            },
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.body(system, prompt))
            .send()
            .await
            .map_err(|e| transport(&self.name, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Unavailable(format!("{} returned {status}", self.name)));
        }
        let payload: GeminiResponse = response
            .json()
            .await
            .map_err(|e| Error::Unavailable(format!("{} response: {e}", self.name)))?;
        let candidate = payload
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::Unavailable(format!("{} returned no candidates", self.name)))?;
        let text: String = candidate.content.map(|c| c.parts.into_iter().map(|p| p.text).collect()).unwrap_or_default();
        if text.trim().is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
            return Err(Error::Unavailable(format!("{} produced no text (finish reason {reason})", self.name)));
        }
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;

    fn backends() -> Vec<BackendConfig> {
        GenerationConfig::default()
            .backends
            .into_iter()
            .map(|b| BackendConfig { api_key: Some("k".into()), ..b })
            .collect()
    }

    #[test]
    fn test_gemini_endpoint_and_body() {
        let g = GeminiGenerator::new(&backends()[0]).unwrap();
        assert_eq!(
            g.endpoint,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-exp:generateContent"
        );
        let json = serde_json::to_value(g.body("sys", "hello")).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
    }

    #[test]
    fn test_gemini_requires_key() {
        let config = BackendConfig { api_key: None, ..backends()[0].clone() };
        assert!(matches!(GeminiGenerator::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_chat_body() {
        let o = OpenAiCompatible::new(&backends()[1]).unwrap();
        let json = serde_json::to_value(o.body("sys", "hello")).unwrap();
        assert_eq!(json["model"], "google/gemma-2-9b-it:free");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["max_tokens"], 2048);
        let no_system = serde_json::to_value(o.body("", "hello")).unwrap();
        assert_eq!(no_system["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_from_config_builds_each_kind() {
        let names: Vec<String> = backends().iter().map(|b| from_config(b).unwrap().name().to_string()).collect();
        assert_eq!(names, vec!["gemini", "openrouter"]);
    }
}
