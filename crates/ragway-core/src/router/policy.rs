//! Per-provider routing policy.

use serde::{Deserialize, Serialize};

pub const DEFAULT_WEIGHT: u32 = 1;
pub const DEFAULT_LATENCY_SLA_MS: u64 = 2_000;

/// Routing policy for one provider, matched by `id`.
///
/// `max_rps` and `max_cost_per_1k` are accepted and carried but not
/// enforced by the router. Keys are read as `maxRPS`, `maxCostPer1K` and
/// `latencySLAms`; the plain camelCase spellings are accepted too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderPolicy {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(rename = "maxRPS", alias = "maxRps", skip_serializing_if = "Option::is_none")]
    pub max_rps: Option<f64>,
    #[serde(rename = "maxCostPer1K", alias = "maxCostPer1k", skip_serializing_if = "Option::is_none")]
    pub max_cost_per_1k: Option<f64>,
    #[serde(rename = "latencySLAms", alias = "latencySlaMs", skip_serializing_if = "Option::is_none")]
    pub latency_sla_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ProviderPolicy {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_latency_sla_ms(mut self, ms: u64) -> Self {
        self.latency_sla_ms = Some(ms);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn weight(&self) -> u32 {
        self.weight.unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn latency_sla_ms(&self) -> u64 {
        self.latency_sla_ms.unwrap_or(DEFAULT_LATENCY_SLA_MS)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}
