//! Types shared across all provider implementations.
//!
//! These define the contract between the router and any LLM backend:
//! a provider turns `ChatMessage`s into a `GenerateResponse` and/or
//! texts into an `EmbeddingsResponse`.

use serde::{Deserialize, Serialize};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Request-side tuning for a chat generation.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Pin the request to one provider.
    pub provider_id: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Vec<String>,
    /// Per-call deadline. Falls back to the router's configured timeout.
    pub timeout_ms: Option<u64>,
    /// Never fall back away from `provider_id`.
    pub strict_provider: bool,
}

/// Request-side tuning for an embedding call.
#[derive(Debug, Clone, Default)]
pub struct EmbedOptions {
    pub provider_id: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Token usage and latency telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

/// Result of a chat generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub provider_id: String,
    pub model: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Result of an embedding call, one vector per input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingsResponse {
    pub provider_id: String,
    pub model: String,
    pub vectors: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are helpful.");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You are helpful.");

        let user = ChatMessage::user("Hello");
        assert_eq!(user.role, Role::User);

        let asst = ChatMessage::assistant("Hi there!");
        assert_eq!(asst.role.as_str(), "assistant");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }

    #[test]
    fn test_response_camel_case() {
        let res = GenerateResponse {
            provider_id: "openai".into(),
            model: "gpt-4o-mini".into(),
            output: "ok".into(),
            finish_reason: None,
            usage: Some(Usage {
                latency_ms: Some(12),
                ..Default::default()
            }),
        };
        let value = serde_json::to_value(&res).unwrap();
        assert_eq!(value["providerId"], "openai");
        assert_eq!(value["usage"]["latencyMs"], 12);
        assert!(value.get("finishReason").is_none());
    }
}
