//! OpenAI-compatible LLM provider.
//!
//! This single implementation covers every vendor that exposes OpenAI-style
//! `/chat/completions` (and optionally `/embeddings`) endpoints:
//!
//! - OpenAI (`https://api.openai.com/v1`)
//! - Google Gemini (`https://generativelanguage.googleapis.com/v1beta/openai`)
//! - Mistral (`https://api.mistral.ai/v1`)
//! - Groq (`https://api.groq.com/openai/v1`)
//! - DeepSeek (`https://api.deepseek.com/v1`)
//! - xAI (`https://api.x.ai/v1`)
//! - vLLM / any local server
//!
//! Retries are the router's job; a failed call here fails once.

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{
    ChatMessage, EmbedOptions, EmbeddingsResponse, GenerateOptions, GenerateResponse, Usage,
};
use super::{request_timeout, Capability, Provider};

struct Vendor {
    id: &'static str,
    label: &'static str,
    base_url: &'static str,
    chat_model: &'static str,
    embed_model: Option<&'static str>,
}

/// Known OpenAI-compatible vendors. A vendor without an embedding model is
/// registered as chat-only.
const VENDORS: &[Vendor] = &[
    Vendor {
        id: "openai",
        label: "OpenAI",
        base_url: "https://api.openai.com/v1",
        chat_model: "gpt-4o-mini",
        embed_model: Some("text-embedding-3-small"),
    },
    Vendor {
        id: "google",
        label: "Google (Gemini)",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        chat_model: "gemini-1.5-pro",
        embed_model: Some("text-embedding-004"),
    },
    Vendor {
        id: "mistral",
        label: "Mistral",
        base_url: "https://api.mistral.ai/v1",
        chat_model: "mistral-small-latest",
        embed_model: Some("mistral-embed"),
    },
    Vendor {
        id: "groq",
        label: "Groq",
        base_url: "https://api.groq.com/openai/v1",
        chat_model: "llama-3.1-8b-instant",
        embed_model: None,
    },
    Vendor {
        id: "deepseek",
        label: "DeepSeek",
        base_url: "https://api.deepseek.com/v1",
        chat_model: "deepseek-chat",
        embed_model: None,
    },
    Vendor {
        id: "xai",
        label: "xAI (Grok)",
        base_url: "https://api.x.ai/v1",
        chat_model: "grok-2-latest",
        embed_model: None,
    },
];

const CHAT_ONLY: &[Capability] = &[Capability::Chat];
const CHAT_AND_EMBED: &[Capability] = &[Capability::Chat, Capability::Embed];

/// OpenAI-compatible provider.
pub struct OpenAiProvider {
    client: Client,
    id: String,
    label: String,
    api_key: String,
    base_url: String,
    chat_model: String,
    embed_model: Option<String>,
}

impl OpenAiProvider {
    /// Create a new provider.
    ///
    /// # Arguments
    /// * `provider_id` - Vendor id (e.g., "openai", "groq", "vllm")
    /// * `api_key` - API key for authentication
    /// * `api_base` - Custom base URL (overrides the vendor default)
    /// * `chat_model` - Chat model override
    /// * `embed_model` - Embedding model override; enables embeddings for
    ///   vendors that have no default one
    pub fn new(
        provider_id: &str,
        api_key: &str,
        api_base: Option<&str>,
        chat_model: Option<&str>,
        embed_model: Option<&str>,
        client: Client,
    ) -> Self {
        let vendor = VENDORS.iter().find(|v| v.id == provider_id);

        let base_url = api_base
            .map(|s| s.to_string())
            .or_else(|| vendor.map(|v| v.base_url.to_string()))
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        let chat_model = chat_model
            .or(vendor.map(|v| v.chat_model))
            .unwrap_or("gpt-4o-mini")
            .to_string();
        let embed_model = embed_model
            .or_else(|| vendor.and_then(|v| v.embed_model))
            .map(|s| s.to_string());

        debug!(provider = provider_id, base_url = %base_url, "Initialized OpenAI-compatible provider");

        Self {
            client,
            id: provider_id.to_string(),
            label: vendor
                .map(|v| v.label.to_string())
                .unwrap_or_else(|| provider_id.to_string()),
            api_key: api_key.to_string(),
            base_url,
            chat_model,
            embed_model,
        }
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B, timeout_ms: Option<u64>) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(request_timeout(timeout_ms))
            .json(body)
            .send()
            .await
            .with_context(|| format!("{} request to {} failed", self.id, url))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read API response body")?;

        if !status.is_success() {
            let err_msg = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.message())
                .unwrap_or(text);
            anyhow::bail!("{} API error ({}): {}", self.id, status, err_msg);
        }

        Ok(text)
    }
}

// ── OpenAI API request/response types ───────────────────────────────

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageResponse>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageResponse,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageResponse {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorResponse {
    Single(ErrorBody),
    Multiple(Vec<ErrorBody>),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl ErrorResponse {
    fn message(&self) -> String {
        match self {
            Self::Single(b) => b.error.message.clone(),
            Self::Multiple(v) => v
                .first()
                .map(|b| b.error.message.clone())
                .unwrap_or_else(|| "Unknown error".into()),
        }
    }
}

// ── Provider implementation ─────────────────────────────────────────

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn capabilities(&self) -> &[Capability] {
        if self.embed_model.is_some() {
            CHAT_AND_EMBED
        } else {
            CHAT_ONLY
        }
    }

    async fn is_healthy(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> Result<GenerateResponse> {
        let model = opts.model.as_deref().unwrap_or(&self.chat_model);
        let request_body = CompletionRequest {
            model,
            messages,
            max_tokens: opts.max_tokens.unwrap_or(512),
            temperature: opts.temperature.unwrap_or(0.2),
            top_p: opts.top_p.unwrap_or(1.0),
            stop: (!opts.stop.is_empty()).then_some(opts.stop.as_slice()),
        };

        debug!(provider = %self.id, model, msg_count = messages.len(), "Sending chat completion request");

        let started = Instant::now();
        let body = self
            .post("/chat/completions", &request_body, opts.timeout_ms)
            .await?;
        let completion: CompletionResponse =
            serde_json::from_str(&body).context("Failed to parse chat completion response")?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .context("API returned no choices")?;

        let mut usage = completion.usage.map_or(Usage::default(), |u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
            ..Usage::default()
        });
        usage.latency_ms = Some(started.elapsed().as_millis() as u64);

        Ok(GenerateResponse {
            provider_id: self.id.clone(),
            model: model.to_string(),
            output: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: Some(usage),
        })
    }

    async fn embed(&self, inputs: &[String], opts: &EmbedOptions) -> Result<EmbeddingsResponse> {
        let model = opts
            .model
            .as_deref()
            .or(self.embed_model.as_deref())
            .with_context(|| format!("Provider {} has no embedding model", self.id))?;

        debug!(provider = %self.id, model, inputs = inputs.len(), "Sending embeddings request");

        let body = self
            .post(
                "/embeddings",
                &EmbeddingRequest {
                    model,
                    input: inputs,
                },
                opts.timeout_ms,
            )
            .await?;
        let parsed: EmbeddingResponse =
            serde_json::from_str(&body).context("Failed to parse embeddings response")?;

        Ok(EmbeddingsResponse {
            provider_id: self.id.clone(),
            model: model.to_string(),
            vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
        })
    }
}
