//! Anthropic messages API provider (chat only).

use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{ChatMessage, GenerateOptions, GenerateResponse, Role, Usage};
use super::{request_timeout, Capability, Provider};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, api_base: Option<&str>, chat_model: Option<&str>, client: Client) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: api_base
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            chat_model: chat_model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<&'a ChatMessage>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<UsageResponse>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsageResponse {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

/// Split out the first system message; Anthropic only accepts user and
/// assistant turns in `messages`.
fn split_system(messages: &[ChatMessage]) -> (Option<&str>, Vec<&ChatMessage>) {
    let system = messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.as_str());
    let turns = messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .collect();
    (system, turns)
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn label(&self) -> &str {
        "Anthropic"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Chat]
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
        let (system, turns) = split_system(messages);
        let body = MessagesRequest {
            model,
            system,
            max_tokens: opts.max_tokens.unwrap_or(512),
            temperature: opts.temperature.unwrap_or(0.2),
            messages: turns,
        };

        debug!(model, msg_count = messages.len(), "Sending Anthropic messages request");

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .timeout(request_timeout(opts.timeout_ms))
            .json(&body)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read Anthropic response body")?;
        if !status.is_success() {
            anyhow::bail!("anthropic API error ({}): {}", status, text);
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&text).context("Failed to parse Anthropic response")?;
        let output = parsed
            .content
            .into_iter()
            .find_map(|b| b.text)
            .unwrap_or_default();

        let usage = Usage {
            prompt_tokens: parsed.usage.as_ref().and_then(|u| u.input_tokens),
            completion_tokens: parsed.usage.as_ref().and_then(|u| u.output_tokens),
            latency_ms: Some(started.elapsed().as_millis() as u64),
            ..Usage::default()
        };

        Ok(GenerateResponse {
            provider_id: self.id().to_string(),
            model: model.to_string(),
            output,
            finish_reason: parsed.stop_reason,
            usage: Some(usage),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_system() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage {
                role: Role::Tool,
                content: "ignored".into(),
            },
            ChatMessage::assistant("hello"),
        ];
        let (system, turns) = split_system(&messages);
        assert_eq!(system, Some("be brief"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_chat_only() {
        let p = AnthropicProvider::new("sk-ant", None, None, Client::new());
        assert!(p.supports(Capability::Chat));
        assert!(!p.supports(Capability::Embed));
        assert!(p.is_healthy().await);
        assert!(p
            .embed(&["x".to_string()], &Default::default())
            .await
            .is_err());
    }
}
