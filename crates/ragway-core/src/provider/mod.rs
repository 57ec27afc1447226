//! LLM provider capability contract and the built-in bindings.
//!
//! Defines the `Provider` trait the router depends on. A provider declares
//! which [`Capability`]s it offers up front; the router checks that set
//! instead of probing for operations. Bindings:
//!
//! - [`openai`]: any OpenAI-compatible endpoint (OpenAI, Gemini, Mistral,
//!   Groq, DeepSeek, xAI)
//! - [`anthropic`]: Anthropic messages API (chat only)
//! - [`ollama`]: local Ollama server (chat + embeddings)

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod types;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProvidersConfig;
use crate::router::DEFAULT_CALL_TIMEOUT;
use types::{ChatMessage, EmbedOptions, EmbeddingsResponse, GenerateOptions, GenerateResponse};

/// Something a provider can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Chat,
    Embed,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Embed => "embed",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for model backends.
///
/// `generate` and `embed` have failing default bodies; a provider overrides
/// the ones matching its declared capabilities. The router never calls an
/// operation the provider did not declare.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique id (e.g. "openai"). Routing policy is matched on it.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn label(&self) -> &str;

    /// Capabilities this provider supports.
    fn capabilities(&self) -> &[Capability];

    /// Cheap liveness probe, used by health reporting only.
    async fn is_healthy(&self) -> bool;

    /// Send a chat completion request.
    async fn generate(
        &self,
        _messages: &[ChatMessage],
        _opts: &GenerateOptions,
    ) -> anyhow::Result<GenerateResponse> {
        anyhow::bail!("Provider {} does not support chat", self.id())
    }

    /// Embed a batch of texts, one vector per input.
    async fn embed(
        &self,
        _inputs: &[String],
        _opts: &EmbedOptions,
    ) -> anyhow::Result<EmbeddingsResponse> {
        anyhow::bail!("Provider {} does not support embeddings", self.id())
    }

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

/// Build the provider registry from configuration, in registration order.
///
/// Only entries with a real API key are registered (Ollama needs none).
pub fn registry_from_config(config: &ProvidersConfig, client: Client) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    for (name, entry) in config.find_all_active() {
        let provider: Arc<dyn Provider> = match name {
            "anthropic" => Arc::new(anthropic::AnthropicProvider::new(
                &entry.api_key,
                entry.api_base.as_deref(),
                entry.chat_model.as_deref(),
                client.clone(),
            )),
            "ollama" => Arc::new(ollama::OllamaProvider::new(
                entry.api_base.as_deref(),
                entry.chat_model.as_deref(),
                entry.embed_model.as_deref(),
                client.clone(),
            )),
            _ => Arc::new(openai::OpenAiProvider::new(
                name,
                &entry.api_key,
                entry.api_base.as_deref(),
                entry.chat_model.as_deref(),
                entry.embed_model.as_deref(),
                client.clone(),
            )),
        };
        debug!(provider = name, capabilities = ?provider.capabilities(), "Registered provider");
        providers.push(provider);
    }

    providers
}

/// HTTP deadline for one binding request, matching the router's per-call
/// timeout when the caller sets none.
pub(crate) fn request_timeout(timeout_ms: Option<u64>) -> Duration {
    timeout_ms.map(Duration::from_millis).unwrap_or(DEFAULT_CALL_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_timeout_shares_router_default() {
        assert_eq!(request_timeout(None), DEFAULT_CALL_TIMEOUT);
        assert_eq!(request_timeout(None), Duration::from_secs(60));
        assert_eq!(request_timeout(Some(1_500)), Duration::from_millis(1_500));
    }

    #[test]
    fn test_registry_skips_placeholder_keys() {
        let json = r#"{
            "openai": {"apiKey": "sk-real"},
            "anthropic": {"apiKey": "sk-ant-YOUR_KEY_HERE"},
            "groq": {"apiKey": "gsk-real"},
            "ollama": {}
        }"#;
        let config: ProvidersConfig = serde_json::from_str(json).unwrap();
        let providers = registry_from_config(&config, Client::new());
        let ids: Vec<&str> = providers.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["openai", "ollama", "groq"]);

        assert!(providers[0].supports(Capability::Embed));
        assert!(providers[1].supports(Capability::Embed));
        assert!(!providers[2].supports(Capability::Embed));
    }
}
