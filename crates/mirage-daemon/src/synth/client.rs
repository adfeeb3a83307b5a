//! HTTP clients for the generative and embedding collaborators

use crate::config::{ModelBackendKind, ModelConfig};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";

/// Collaborator failures. Never retried — the engine prefers a visible
/// failure over serving content it cannot replay consistently.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("invalid model response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Chat + embedding client over one bounded reqwest client.
#[derive(Debug, Clone)]
pub struct ModelClient {
    http: Client,
    config: ModelConfig,
}

impl ModelClient {
    /// Build the client. The timeout bounds every collaborator call,
    /// including the generative one.
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// One chat completion: system + user message in, raw text out.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String, ModelError> {
        match self.config.backend {
            ModelBackendKind::Ollama => self.chat_ollama(system, user).await,
            ModelBackendKind::OpenAi => self.chat_openai(system, user).await,
        }
    }

    async fn chat_ollama(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let url = format!("{}/api/chat", self.config.endpoint.trim_end_matches('/'));
        let payload = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": false,
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ModelError::Request(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Request(format!(
                "ollama error {}: {}",
                status,
                truncate(&body, 320)
            )));
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("invalid ollama response: {e}")))?;

        Ok(body.message.content)
    }

    async fn chat_openai(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::Request("openai backend requires api_key".to_string()))?;

        let endpoint = if self.config.endpoint.is_empty() {
            DEFAULT_OPENAI_ENDPOINT
        } else {
            &self.config.endpoint
        };
        let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));

        let payload = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ModelError::Request(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Request(format!(
                "openai error {}: {}",
                status,
                truncate(&body, 320)
            )));
        }

        let body: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("invalid openai response: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                ModelError::InvalidResponse("openai response did not include choices".to_string())
            })
    }

    /// Embed a semantic key into vector space.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let url = format!(
            "{}/api/embeddings",
            self.config.endpoint.trim_end_matches('/')
        );
        let payload = json!({
            "model": self.config.embed_model,
            "prompt": text,
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ModelError::Request(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Request(format!(
                "embedding error {}: {}",
                status,
                truncate(&body, 320)
            )));
        }

        let body: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            ModelError::InvalidResponse(format!("invalid embedding response: {e}"))
        })?;

        Ok(body.embedding)
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{truncated}...")
    } else {
        truncated
    }
}
