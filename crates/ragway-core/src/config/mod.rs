//! Configuration module for ragway.
//!
//! Loads typed configuration from `~/.ragway/config.json`.
//! Every section is optional; missing keys fall back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::breaker::{DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD};
use crate::router::{ProviderPolicy, RouterSettings, Strategy, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_TOKENS};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub router: RouterConfig,
    pub rag: RagConfig,
}

impl Config {
    /// Load configuration from the default path (`~/.ragway/config.json`).
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ragway")
    }

    /// Check the values that would make the router misbehave.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.router.failure_threshold == 0 {
            errors.push("router.failureThreshold must be at least 1".to_string());
        }
        if self.router.call_timeout_ms == 0 {
            errors.push("router.callTimeoutMs must be greater than 0".to_string());
        }
        if self.rag.top_k == 0 {
            errors.push("rag.topK must be at least 1".to_string());
        }
        if !(0.0..=2.0).contains(&self.rag.temperature) {
            errors.push(format!(
                "rag.temperature must be between 0.0 and 2.0 (got {})",
                self.rag.temperature
            ));
        }

        let active: Vec<&str> = self.providers.find_all_active().map(|(name, _)| name).collect();
        if active.is_empty() {
            errors.push("no provider configured (set an apiKey or add an ollama entry)".to_string());
        }
        if let Some(id) = &self.rag.default_provider {
            if !active.contains(&id.as_str()) {
                errors.push(format!("rag.defaultProvider '{}' is not a configured provider", id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Write the default config template to disk.
    pub fn write_default_template() -> anyhow::Result<PathBuf> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = serde_json::json!({
            "providers": {
                "groq": { "apiKey": "gsk_YOUR_KEY_HERE", "weight": 3, "latencySLAms": 700 },
                "openai": { "apiKey": "sk-YOUR_KEY_HERE", "weight": 3, "latencySLAms": 900 },
                "anthropic": { "apiKey": "sk-ant-YOUR_KEY_HERE", "weight": 2, "latencySLAms": 1100 },
                "google": { "apiKey": "YOUR_GEMINI_KEY_HERE", "weight": 2, "latencySLAms": 1200 },
                "mistral": { "apiKey": "YOUR_MISTRAL_KEY_HERE", "weight": 2, "latencySLAms": 1000 },
                "ollama": { "apiBase": "http://localhost:11434", "weight": 1, "latencySLAms": 25 },
                "deepseek": { "apiKey": "YOUR_DEEPSEEK_KEY_HERE", "weight": 1, "latencySLAms": 1200 },
                "xai": { "apiKey": "xai-YOUR_KEY_HERE", "weight": 1, "latencySLAms": 1300 }
            },
            "router": {
                "strategy": "smart",
                "failureThreshold": DEFAULT_FAILURE_THRESHOLD,
                "cooldownMs": DEFAULT_COOLDOWN.as_millis() as u64,
                "defaultMaxTokens": DEFAULT_MAX_TOKENS,
                "callTimeoutMs": DEFAULT_CALL_TIMEOUT.as_millis() as u64
            },
            "rag": {
                "topK": 5,
                "temperature": 0.2,
                "maxTokens": 512,
                "embedFallback": "ollama"
            }
        });

        std::fs::write(&path, serde_json::to_string_pretty(&template)?)?;
        Ok(path)
    }
}

// ── Provider Configuration ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderEntry {
    pub api_key: String,
    pub api_base: Option<String>,
    pub chat_model: Option<String>,
    pub embed_model: Option<String>,
    pub weight: Option<u32>,
    #[serde(rename = "latencySLAms", alias = "latencySlaMs")]
    pub latency_sla_ms: Option<u64>,
    pub enabled: Option<bool>,
    #[serde(rename = "maxRPS", alias = "maxRps")]
    pub max_rps: Option<f64>,
    #[serde(rename = "maxCostPer1K", alias = "maxCostPer1k")]
    pub max_cost_per_1k: Option<f64>,
}

impl ProviderEntry {
    /// Template keys look like `sk-YOUR_KEY_HERE`.
    fn has_real_key(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_key.contains("YOUR_")
    }

    fn policy(&self, id: &str) -> ProviderPolicy {
        ProviderPolicy {
            id: id.to_string(),
            weight: self.weight,
            max_rps: self.max_rps,
            max_cost_per_1k: self.max_cost_per_1k,
            latency_sla_ms: self.latency_sla_ms,
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderEntry>,
    pub anthropic: Option<ProviderEntry>,
    pub google: Option<ProviderEntry>,
    pub mistral: Option<ProviderEntry>,
    pub ollama: Option<ProviderEntry>,
    pub groq: Option<ProviderEntry>,
    pub deepseek: Option<ProviderEntry>,
    pub xai: Option<ProviderEntry>,
}

impl ProvidersConfig {
    /// All entries in registration order, configured or not.
    fn entries(&self) -> [(&'static str, Option<&ProviderEntry>); 8] {
        [
            ("openai", self.openai.as_ref()),
            ("anthropic", self.anthropic.as_ref()),
            ("google", self.google.as_ref()),
            ("mistral", self.mistral.as_ref()),
            ("ollama", self.ollama.as_ref()),
            ("groq", self.groq.as_ref()),
            ("deepseek", self.deepseek.as_ref()),
            ("xai", self.xai.as_ref()),
        ]
    }

    /// Configured providers in registration order. Ollama needs no key; every
    /// other entry needs a non-placeholder API key.
    pub fn find_all_active(&self) -> impl Iterator<Item = (&'static str, &ProviderEntry)> + '_ {
        self.entries()
            .into_iter()
            .filter_map(|(name, entry)| entry.map(|e| (name, e)))
            .filter(|(name, e)| *name == "ollama" || e.has_real_key())
    }

    /// Routing policies for every active provider.
    pub fn policies(&self) -> Vec<ProviderPolicy> {
        self.find_all_active()
            .map(|(name, entry)| entry.policy(name))
            .collect()
    }
}

// ── Router Configuration ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RouterConfig {
    pub strategy: Strategy,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub default_max_tokens: u32,
    pub call_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Smart,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN.as_millis() as u64,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT.as_millis() as u64,
        }
    }
}

impl RouterConfig {
    pub fn settings(&self) -> RouterSettings {
        RouterSettings {
            strategy: self.strategy,
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
            default_max_tokens: self.default_max_tokens,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

// ── RAG Configuration ───────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RagConfig {
    pub top_k: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub default_provider: Option<String>,
    pub embed_fallback: Option<String>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            temperature: 0.2,
            max_tokens: 512,
            default_provider: None,
            embed_fallback: Some("ollama".into()),
        }
    }
}
