//! Local Ollama provider.
//!
//! Uses the native `/api/generate` and `/api/embeddings` endpoints. The
//! conversation is flattened into one role-prefixed prompt, and embeddings
//! are requested one input at a time.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::types::{
    ChatMessage, EmbedOptions, EmbeddingsResponse, GenerateOptions, GenerateResponse, Usage,
};
use super::{request_timeout, Capability, Provider};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_CHAT_MODEL: &str = "llama3";
const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    chat_model: String,
    embed_model: String,
}

impl OllamaProvider {
    pub fn new(
        api_base: Option<&str>,
        chat_model: Option<&str>,
        embed_model: Option<&str>,
        client: Client,
    ) -> Self {
        Self {
            client,
            base_url: api_base
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            chat_model: chat_model.unwrap_or(DEFAULT_CHAT_MODEL).to_string(),
            embed_model: embed_model.unwrap_or(DEFAULT_EMBED_MODEL).to_string(),
        }
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout_ms: Option<u64>,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .timeout(request_timeout(timeout_ms))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Ollama request to {} failed", path))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("ollama API error ({}): {}", status, text);
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse Ollama {} response", path))
    }
}

/// Flatten a conversation into `ROLE: content` lines.
fn flatten_prompt(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: serde_json::Value,
}

#[derive(Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct EmbeddingReply {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[async_trait]
impl Provider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    fn label(&self) -> &str {
        "Ollama (Local)"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Chat, Capability::Embed]
    }

    async fn is_healthy(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> Result<GenerateResponse> {
        let model = opts.model.as_deref().unwrap_or(&self.chat_model);
        let request = GenerateRequest {
            model,
            prompt: flatten_prompt(messages),
            stream: false,
            options: json!({
                "temperature": opts.temperature.unwrap_or(0.2),
                "num_predict": opts.max_tokens.unwrap_or(512),
            }),
        };

        debug!(model, msg_count = messages.len(), "Sending Ollama generate request");

        let started = Instant::now();
        let reply: GenerateReply = self
            .post_json("/api/generate", &serde_json::to_value(&request)?, opts.timeout_ms)
            .await?;

        let usage = Usage {
            prompt_tokens: reply.prompt_eval_count,
            completion_tokens: reply.eval_count,
            latency_ms: Some(started.elapsed().as_millis() as u64),
            ..Usage::default()
        };

        Ok(GenerateResponse {
            provider_id: self.id().to_string(),
            model: model.to_string(),
            output: reply.response,
            finish_reason: reply.done_reason,
            usage: Some(usage),
        })
    }

    async fn embed(&self, inputs: &[String], opts: &EmbedOptions) -> Result<EmbeddingsResponse> {
        let model = opts.model.as_deref().unwrap_or(&self.embed_model);
        let mut vectors = Vec::with_capacity(inputs.len());

        for text in inputs {
            let reply: EmbeddingReply = self
                .post_json(
                    "/api/embeddings",
                    &json!({ "model": model, "prompt": text }),
                    opts.timeout_ms,
                )
                .await?;
            vectors.push(reply.embedding);
        }

        Ok(EmbeddingsResponse {
            provider_id: self.id().to_string(),
            model: model.to_string(),
            vectors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_prompt() {
        let prompt = flatten_prompt(&[ChatMessage::system("be brief"), ChatMessage::user("hi")]);
        assert_eq!(prompt, "SYSTEM: be brief\nUSER: hi");
    }

    #[test]
    fn test_defaults() {
        let p = OllamaProvider::new(None, None, None, Client::new());
        assert_eq!(p.base_url, "http://localhost:11434");
        assert_eq!(p.embed_model, "nomic-embed-text");
        assert!(p.supports(Capability::Embed));
    }
}
