//! Scripted in-process providers for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::provider::types::{
    ChatMessage, EmbedOptions, EmbeddingsResponse, GenerateOptions, GenerateResponse,
};
use crate::provider::{Capability, Provider};

type EmbedFn = Box<dyn Fn(&str) -> Vec<f32> + Send + Sync>;

pub(crate) struct MockProvider {
    id: String,
    capabilities: Vec<Capability>,
    fail_chat: bool,
    fail_embed: bool,
    chat_delay: Option<Duration>,
    embed_fn: EmbedFn,
    chat_calls: AtomicUsize,
    embed_calls: AtomicUsize,
    chat_times: Mutex<Vec<Instant>>,
    last_options: Mutex<Option<GenerateOptions>>,
    last_messages: Mutex<Vec<ChatMessage>>,
}

impl MockProvider {
    pub fn chat(id: &str) -> Self {
        Self::with_capabilities(id, vec![Capability::Chat])
    }

    pub fn embedder(id: &str) -> Self {
        Self::with_capabilities(id, vec![Capability::Embed])
    }

    pub fn full(id: &str) -> Self {
        Self::with_capabilities(id, vec![Capability::Chat, Capability::Embed])
    }

    fn with_capabilities(id: &str, capabilities: Vec<Capability>) -> Self {
        Self {
            id: id.to_string(),
            capabilities,
            fail_chat: false,
            fail_embed: false,
            chat_delay: None,
            embed_fn: Box::new(|_| vec![1.0, 0.0]),
            chat_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
            chat_times: Mutex::new(Vec::new()),
            last_options: Mutex::new(None),
            last_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_chat = true;
        self.fail_embed = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.chat_delay = Some(delay);
        self
    }

    pub fn embedding_with(mut self, f: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static) -> Self {
        self.embed_fn = Box::new(f);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn chat_times(&self) -> Vec<Instant> {
        self.chat_times.lock().unwrap().clone()
    }

    pub fn last_options(&self) -> Option<GenerateOptions> {
        self.last_options.lock().unwrap().clone()
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.last_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn is_healthy(&self) -> bool {
        !self.fail_chat
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        opts: &GenerateOptions,
    ) -> anyhow::Result<GenerateResponse> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.chat_times.lock().unwrap().push(Instant::now());
        *self.last_options.lock().unwrap() = Some(opts.clone());
        *self.last_messages.lock().unwrap() = messages.to_vec();

        if let Some(delay) = self.chat_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_chat {
            anyhow::bail!("{} is down", self.id);
        }
        Ok(GenerateResponse {
            provider_id: self.id.clone(),
            model: opts.model.clone().unwrap_or_else(|| "mock-model".into()),
            output: format!("answer from {}", self.id),
            finish_reason: Some("stop".into()),
            usage: None,
        })
    }

    async fn embed(&self, inputs: &[String], _opts: &EmbedOptions) -> anyhow::Result<EmbeddingsResponse> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed {
            anyhow::bail!("{} embeddings are down", self.id);
        }
        Ok(EmbeddingsResponse {
            provider_id: self.id.clone(),
            model: "mock-embed".into(),
            vectors: inputs.iter().map(|t| (self.embed_fn)(t)).collect(),
        })
    }
}
