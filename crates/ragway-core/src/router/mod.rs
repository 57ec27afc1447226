//! Multi-provider router.
//!
//! The router owns the provider registry, one [`CircuitBreaker`] per
//! provider and the current [`Strategy`]. For chat it:
//! 1. Honours an explicitly pinned provider (optionally strict)
//! 2. Otherwise asks the strategy for the best eligible, untried provider
//! 3. Records every outcome on that provider's breaker
//! 4. Backs off (`100 + attempt * 200` ms) between failed attempts
//!
//! Embedding calls walk eligible embedding providers in order, without
//! backoff. Every provider call is raced against a deadline; a timeout is
//! an ordinary failure.

pub mod policy;
pub mod strategy;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerSnapshot, CircuitBreaker, DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD};
use crate::error::{GatewayError, Result};
use crate::provider::types::{
    ChatMessage, EmbedOptions, EmbeddingsResponse, GenerateOptions, GenerateResponse,
};
use crate::provider::{Capability, Provider};
pub use policy::ProviderPolicy;
use strategy::Candidate;
pub use strategy::Strategy;

/// Max tokens handed to a provider when the caller sets none.
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// Deadline for a single provider call when the caller sets none.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Outcome of one provider call. The fallback loop branches on this value;
/// the breaker has already been updated by the time it is returned.
type Attempt<T> = anyhow::Result<T>;

const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_STEP_MS: u64 = 200;

/// Delay after the `attempt`-th failed chat attempt (zero-based).
pub fn backoff_delay(attempt: usize) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS + attempt as u64 * BACKOFF_STEP_MS)
}

/// Tunables fixed at router construction.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub strategy: Strategy,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub default_max_tokens: u32,
    pub call_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Smart,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Health report for one provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub id: String,
    pub label: String,
    pub capabilities: Vec<Capability>,
    pub healthy: bool,
    pub enabled: bool,
    pub breaker: BreakerSnapshot,
}

/// Routes chat and embedding requests across providers.
pub struct Router {
    providers: Vec<Arc<dyn Provider>>,
    policies: HashMap<String, ProviderPolicy>,
    breakers: HashMap<String, CircuitBreaker>,
    rr_cursor: AtomicUsize,
    strategy: RwLock<Strategy>,
    settings: RouterSettings,
}

impl Router {
    /// Build a router over `providers` (registration order is significant).
    /// Policies are matched by id; providers without one get defaults.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        policies: Vec<ProviderPolicy>,
        settings: RouterSettings,
    ) -> Self {
        let breakers = providers
            .iter()
            .map(|p| {
                (
                    p.id().to_string(),
                    CircuitBreaker::new(settings.failure_threshold, settings.cooldown),
                )
            })
            .collect();
        let policies = policies.into_iter().map(|p| (p.id.clone(), p)).collect();

        info!(
            providers = providers.len(),
            strategy = %settings.strategy,
            "Router initialized"
        );

        Self {
            providers,
            policies,
            breakers,
            rr_cursor: AtomicUsize::new(0),
            strategy: RwLock::new(settings.strategy),
            settings,
        }
    }

    pub fn strategy(&self) -> Strategy {
        *self.strategy.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_strategy(&self, strategy: Strategy) {
        *self.strategy.write().unwrap_or_else(PoisonError::into_inner) = strategy;
        info!(strategy = %strategy, "Routing strategy changed");
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn provider(&self, id: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    pub fn breaker(&self, id: &str) -> Option<&CircuitBreaker> {
        self.breakers.get(id)
    }

    fn policy(&self, id: &str) -> Option<&ProviderPolicy> {
        self.policies.get(id)
    }

    fn is_enabled(&self, id: &str) -> bool {
        self.policy(id).map_or(true, ProviderPolicy::enabled)
    }

    fn breaker_passes(&self, id: &str) -> bool {
        self.breakers.get(id).map_or(true, CircuitBreaker::can_pass)
    }

    /// Providers not in `exclude`, enabled by policy and with a passing breaker.
    pub fn eligible(&self, exclude: &[String]) -> Vec<&Arc<dyn Provider>> {
        self.providers
            .iter()
            .filter(|p| {
                let id = p.id();
                !exclude.iter().any(|t| t == id) && self.is_enabled(id) && self.breaker_passes(id)
            })
            .collect()
    }

    /// Ask the current strategy for the best eligible chat provider.
    fn pick(&self, exclude: &[String]) -> Option<&Arc<dyn Provider>> {
        let list: Vec<&Arc<dyn Provider>> = self
            .eligible(exclude)
            .into_iter()
            .filter(|p| p.supports(Capability::Chat))
            .collect();

        let candidates: Vec<Candidate> = list
            .iter()
            .map(|p| {
                let policy = self.policy(p.id());
                Candidate {
                    weight: policy.map_or(policy::DEFAULT_WEIGHT, ProviderPolicy::weight),
                    latency_sla_ms: policy
                        .map_or(policy::DEFAULT_LATENCY_SLA_MS, ProviderPolicy::latency_sla_ms),
                }
            })
            .collect();

        strategy::select(self.strategy(), &candidates, &self.rr_cursor).map(|i| list[i])
    }

    fn call_timeout(&self, timeout_ms: Option<u64>) -> Duration {
        timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.call_timeout)
    }

    /// Run one provider call under a deadline and record the outcome on its
    /// breaker.
    async fn attempt<T, F>(
        &self,
        provider: &dyn Provider,
        capability: Capability,
        timeout: Duration,
        call: F,
    ) -> Attempt<T>
    where
        F: Future<Output = Attempt<T>>,
    {
        let id = provider.id();
        let outcome = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::Error::new(GatewayError::Timeout {
                label: format!("{}.{}", id, capability),
                ms: timeout.as_millis() as u64,
            })),
        };

        if let Some(breaker) = self.breakers.get(id) {
            match &outcome {
                Ok(_) => breaker.record_success(),
                Err(_) => breaker.record_failure(),
            }
        }

        match &outcome {
            Ok(_) => debug!(provider = id, %capability, "Provider call succeeded"),
            Err(e) => warn!(provider = id, %capability, error = %e, "Provider call failed"),
        }

        outcome
    }

    /// Generate a chat completion, honouring pinning, breakers and strategy.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> Result<GenerateResponse> {
        let mut call_opts = opts.clone();
        call_opts
            .max_tokens
            .get_or_insert(self.settings.default_max_tokens);
        let timeout = self.call_timeout(opts.timeout_ms);
        let mut tried: Vec<String> = Vec::new();

        if let Some(id) = opts.provider_id.as_deref() {
            let chosen = self
                .provider(id)
                .filter(|p| p.supports(Capability::Chat))
                .ok_or_else(|| GatewayError::UnknownOrUnsupportedProvider {
                    id: id.to_string(),
                    capability: Capability::Chat,
                })?;

            if !self.breaker_passes(id) {
                if opts.strict_provider {
                    return Err(GatewayError::CircuitOpen(id.to_string()));
                }
                debug!(provider = id, "Pinned provider circuit open, using pool");
            } else {
                let outcome = self
                    .attempt(
                        chosen.as_ref(),
                        Capability::Chat,
                        timeout,
                        chosen.generate(messages, &call_opts),
                    )
                    .await;
                match outcome {
                    Ok(res) => return Ok(res),
                    Err(e) => {
                        tried.push(id.to_string());
                        if opts.strict_provider {
                            return Err(GatewayError::from_provider(id, e));
                        }
                    }
                }
            }
        }

        let max_attempts = self.providers.len();
        for attempt in 0..max_attempts {
            let Some(provider) = self.pick(&tried) else {
                return Err(exhausted(Capability::Chat, tried));
            };
            let id = provider.id().to_string();
            debug!(provider = %id, attempt, strategy = %self.strategy(), "Routing chat request");
            tried.push(id.clone());

            let outcome = self
                .attempt(
                    provider.as_ref(),
                    Capability::Chat,
                    timeout,
                    provider.generate(messages, &call_opts),
                )
                .await;

            match outcome {
                Ok(res) => {
                    info!(provider = %id, attempt, "Chat request served");
                    return Ok(res);
                }
                Err(_) if attempt + 1 < max_attempts => {
                    let delay = backoff_delay(attempt);
                    warn!(provider = %id, attempt, delay_ms = delay.as_millis() as u64, "Retrying chat on next provider");
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {}
            }
        }

        Err(exhausted(Capability::Chat, tried))
    }

    /// Embed `inputs`. A pinned provider gets exactly one attempt; otherwise
    /// every eligible embedding provider is tried in order.
    pub async fn embed(&self, inputs: &[String], opts: &EmbedOptions) -> Result<EmbeddingsResponse> {
        let timeout = self.call_timeout(opts.timeout_ms);

        if let Some(id) = opts.provider_id.as_deref() {
            let p = self
                .provider(id)
                .filter(|p| p.supports(Capability::Embed))
                .ok_or_else(|| GatewayError::UnknownOrUnsupportedProvider {
                    id: id.to_string(),
                    capability: Capability::Embed,
                })?;
            return self
                .attempt(p.as_ref(), Capability::Embed, timeout, p.embed(inputs, opts))
                .await
                .map_err(|e| GatewayError::from_provider(id, e));
        }

        let candidates: Vec<&Arc<dyn Provider>> = self
            .eligible(&[])
            .into_iter()
            .filter(|p| p.supports(Capability::Embed))
            .collect();
        if candidates.is_empty() {
            return Err(GatewayError::EmbeddingUnavailable);
        }

        let mut tried = Vec::with_capacity(candidates.len());
        for p in candidates {
            tried.push(p.id().to_string());
            if let Ok(res) = self
                .attempt(p.as_ref(), Capability::Embed, timeout, p.embed(inputs, opts))
                .await
            {
                return Ok(res);
            }
        }

        Err(GatewayError::AllProvidersFailed {
            capability: Capability::Embed,
            tried,
        })
    }

    /// Probe every provider concurrently. Routing never consults this.
    pub async fn health(&self) -> Vec<ProviderHealth> {
        let probes = self.providers.iter().map(|p| async move {
            let healthy = p.is_healthy().await;
            ProviderHealth {
                id: p.id().to_string(),
                label: p.label().to_string(),
                capabilities: p.capabilities().to_vec(),
                healthy,
                enabled: self.is_enabled(p.id()),
                breaker: self
                    .breakers
                    .get(p.id())
                    .map(CircuitBreaker::snapshot)
                    .unwrap_or_else(|| CircuitBreaker::default().snapshot()),
            }
        });
        join_all(probes).await
    }
}

fn exhausted(capability: Capability, tried: Vec<String>) -> GatewayError {
    if tried.is_empty() {
        GatewayError::NoEligibleProviders(capability)
    } else {
        GatewayError::AllProvidersFailed { capability, tried }
    }
}
