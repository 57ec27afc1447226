//! Error types surfaced by the router and the RAG pipeline.
//!
//! Individual provider failures stay `anyhow::Error` inside the bindings.
//! They only become a [`GatewayError`] when the router decides they escape
//! the retry loop.

use thiserror::Error;

use crate::provider::Capability;

/// Errors returned to callers of the router and the RAG pipeline.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The pinned provider does not exist or lacks the requested capability.
    #[error("Unknown or unsupported {capability} provider: {id}")]
    UnknownOrUnsupportedProvider { id: String, capability: Capability },

    /// The pinned provider's circuit is open and fallback was forbidden.
    #[error("Provider circuit open: {0}")]
    CircuitOpen(String),

    /// No provider could even be attempted for the capability.
    #[error("No available providers for {0}")]
    NoEligibleProviders(Capability),

    /// Every attempted provider failed. `tried` is in attempt order.
    #[error("All {capability} providers failed (tried: {})", tried.join(", "))]
    AllProvidersFailed {
        capability: Capability,
        tried: Vec<String>,
    },

    /// No embedding-capable provider is reachable.
    #[error("No embedding providers available")]
    EmbeddingUnavailable,

    /// A single call exceeded its deadline.
    #[error("Timeout: {label} ({ms}ms)")]
    Timeout { label: String, ms: u64 },

    /// A pinned provider failed and strict mode forbids fallback.
    #[error("Provider {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Question is required (at least {min_len} characters)")]
    InvalidQuestion { min_len: usize },

    #[error("Ingest error: {0}")]
    Ingest(String),
}

impl GatewayError {
    /// Wrap a provider failure, keeping timeouts distinguishable.
    pub(crate) fn from_provider(provider: &str, err: anyhow::Error) -> Self {
        match err.downcast::<GatewayError>() {
            Ok(inner) => inner,
            Err(source) => GatewayError::Provider {
                provider: provider.to_string(),
                source,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
