//! Retrieval-augmented answering.
//!
//! [`RagPipeline`] retrieves the top chunks for a question, packs them into
//! a numbered context block and asks the router for a grounded answer.

mod prompt;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::RagConfig;
use crate::error::{GatewayError, Result};
use crate::provider::types::{ChatMessage, GenerateOptions, GenerateResponse};
use crate::router::Router;
use crate::store::{StoreStats, UpsertItem, VectorStore};
pub use prompt::Language;

/// Shortest accepted question, after trimming.
pub const MIN_QUESTION_LEN: usize = 3;

const DEFAULT_TOP_K: usize = 5;
const DEFAULT_MAX_TOKENS: u32 = 512;
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Per-call knobs for [`RagPipeline::answer`].
#[derive(Debug, Clone)]
pub struct AnswerOptions {
    pub k: usize,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub provider_id: Option<String>,
    pub model: Option<String>,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_TOP_K,
            system: None,
            max_tokens: None,
            temperature: None,
            provider_id: None,
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    pub id: String,
    pub meta: Map<String, Value>,
}

/// A generated answer plus the chunks it was grounded on, in retrieval order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    #[serde(flatten)]
    pub response: GenerateResponse,
    pub references: Vec<Reference>,
}

/// A user-facing question with presentation options.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub question: String,
    pub top_k: Option<usize>,
    pub language: Language,
    /// Narrows the question: `Focus on <subject>. <question>`.
    pub subject: Option<String>,
    pub provider_id: Option<String>,
    pub model: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub indexed: usize,
    pub failed: usize,
}

pub struct RagPipeline {
    router: Arc<Router>,
    store: Arc<VectorStore>,
    config: RagConfig,
}

impl RagPipeline {
    pub fn new(router: Arc<Router>, store: Arc<VectorStore>) -> Self {
        Self::with_config(router, store, RagConfig::default())
    }

    pub fn with_config(router: Arc<Router>, store: Arc<VectorStore>, config: RagConfig) -> Self {
        Self {
            router,
            store,
            config,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn index_stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Answer `question` from the index. With nothing retrieved, returns a
    /// canned reply and never calls a provider.
    pub async fn answer(&self, question: &str, opts: AnswerOptions) -> Result<Answer> {
        let hits = self.store.search(question, opts.k, None).await;

        if hits.is_empty() {
            info!(k = opts.k, "No indexed context for question");
            let language = Language::of_system_prompt(opts.system.as_deref());
            return Ok(Answer {
                response: GenerateResponse {
                    provider_id: "n/a".into(),
                    model: "n/a".into(),
                    output: language.insufficient_context().to_string(),
                    finish_reason: None,
                    usage: None,
                },
                references: Vec::new(),
            });
        }

        let context = prompt::numbered_context(hits.iter().map(|h| h.text.as_str()));
        let system = opts.system.as_deref().unwrap_or(prompt::DEFAULT_SYSTEM_PROMPT);
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(&prompt::user_message(question, &context)),
        ];

        let gen_opts = GenerateOptions {
            provider_id: opts.provider_id,
            model: opts.model,
            max_tokens: Some(opts.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            temperature: Some(opts.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
            ..GenerateOptions::default()
        };
        let response = self.router.generate(&messages, &gen_opts).await?;

        info!(
            provider = %response.provider_id,
            references = hits.len(),
            "Answer generated"
        );

        Ok(Answer {
            response,
            references: hits
                .into_iter()
                .map(|h| Reference { id: h.id, meta: h.meta })
                .collect(),
        })
    }

    /// Validate and shape a user query, then [`answer`](Self::answer) it
    /// with the configured defaults.
    pub async fn query(&self, req: QueryRequest) -> Result<Answer> {
        let question = req.question.trim();
        if question.chars().count() < MIN_QUESTION_LEN {
            return Err(GatewayError::InvalidQuestion {
                min_len: MIN_QUESTION_LEN,
            });
        }

        let question = match req.subject.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(subject) => format!("Focus on {}. {}", subject, question),
            None => question.to_string(),
        };

        let opts = AnswerOptions {
            k: req.top_k.unwrap_or(self.config.top_k),
            system: Some(req.language.system_prompt().to_string()),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            provider_id: req.provider_id.or_else(|| self.config.default_provider.clone()),
            model: req.model,
        };
        self.answer(&question, opts).await
    }

    /// Index one document. Fails when the text is blank or the store
    /// rejected the chunk.
    pub async fn ingest_one(&self, item: UpsertItem) -> Result<()> {
        if item.text.trim().is_empty() {
            return Err(GatewayError::Ingest("document text is empty".into()));
        }
        let label = item.id.clone().unwrap_or_else(|| "<new>".into());
        match self.store.upsert(vec![item]).await? {
            0 => Err(GatewayError::Ingest(format!("document {} was not indexed", label))),
            _ => Ok(()),
        }
    }

    /// Index documents one at a time. A failing document is counted and
    /// skipped.
    pub async fn ingest_all(&self, items: Vec<UpsertItem>) -> IngestReport {
        let mut report = IngestReport::default();
        for item in items {
            let id = item.id.clone();
            match self.ingest_one(item).await {
                Ok(()) => report.indexed += 1,
                Err(e) => {
                    warn!(id = ?id, error = %e, "Failed to ingest document");
                    report.failed += 1;
                }
            }
        }
        info!(indexed = report.indexed, failed = report.failed, "Ingest finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::Role;
    use crate::provider::Provider;
    use crate::router::{RouterSettings, Strategy};
    use crate::store::RouterEmbedder;
    use crate::testing::MockProvider;

    /// Embeds by keyword: "refund" and "shipping" get orthogonal axes.
    fn keyword_vector(text: &str) -> Vec<f32> {
        let t = text.to_lowercase();
        let refund = if t.contains("refund") { 1.0 } else { 0.0 };
        let shipping = if t.contains("shipping") { 1.0 } else { 0.0 };
        if t.contains("empty") {
            return Vec::new();
        }
        vec![refund, shipping, 0.1]
    }

    fn pipeline(chat: Arc<MockProvider>) -> (RagPipeline, Arc<MockProvider>) {
        let embedder = MockProvider::embedder("embed")
            .embedding_with(keyword_vector)
            .into_arc();
        let providers: Vec<Arc<dyn Provider>> = vec![chat, embedder.clone()];
        let router = Arc::new(Router::new(
            providers,
            vec![],
            RouterSettings {
                strategy: Strategy::Failover,
                ..RouterSettings::default()
            },
        ));
        let store = Arc::new(VectorStore::new(Arc::new(RouterEmbedder::new(router.clone(), None))));
        (RagPipeline::new(router, store), embedder)
    }

    fn docs() -> Vec<UpsertItem> {
        vec![
            UpsertItem::new("Refunds are issued within 14 days.").with_id("refunds"),
            UpsertItem::new("Shipping takes 3 business days.").with_id("shipping"),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_index_returns_canned_reply() {
        let chat = MockProvider::chat("chat").into_arc();
        let (rag, _) = pipeline(chat.clone());

        let answer = rag.answer("What is the refund policy?", AnswerOptions::default()).await.unwrap();
        assert_eq!(answer.response.output, "Insufficient indexed context to answer this question.");
        assert_eq!(answer.response.provider_id, "n/a");
        assert_eq!(answer.response.model, "n/a");
        assert!(answer.references.is_empty());

        let arabic = AnswerOptions {
            system: Some(Language::Arabic.system_prompt().to_string()),
            ..AnswerOptions::default()
        };
        let answer = rag.answer("ما هي سياسة الاسترداد؟", arabic).await.unwrap();
        assert_eq!(answer.response.output, "لا توجد معلومات كافية في الفهرس للإجابة على السؤال.");
        assert_eq!(chat.chat_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_builds_grounded_prompt() {
        let chat = MockProvider::chat("chat").into_arc();
        let (rag, _) = pipeline(chat.clone());
        assert_eq!(rag.ingest_all(docs()).await, IngestReport { indexed: 2, failed: 0 });

        let answer = rag
            .answer("How do refunds work?", AnswerOptions { k: 1, ..AnswerOptions::default() })
            .await
            .unwrap();
        assert_eq!(answer.response.provider_id, "chat");
        assert_eq!(answer.references.len(), 1);
        assert_eq!(answer.references[0].id, "refunds");
        assert!(answer.references[0].meta.contains_key("score"));

        let messages = chat.last_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, prompt::DEFAULT_SYSTEM_PROMPT);
        assert_eq!(
            messages[1].content,
            "QUESTION: How do refunds work?\n\nCONTEXT:\n[1] Refunds are issued within 14 days.\n\n\
             INSTRUCTIONS: If the answer is not in the context, say you do not have enough information."
        );

        let opts = chat.last_options().unwrap();
        assert_eq!(opts.max_tokens, Some(512));
        assert_eq!(opts.temperature, Some(0.2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_propagates_routing_failure() {
        let chat = MockProvider::chat("chat").failing().into_arc();
        let (rag, _) = pipeline(chat);
        rag.ingest_all(docs()).await;

        let err = rag.answer("refund?", AnswerOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AllProvidersFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_validates_and_shapes_question() {
        let chat = MockProvider::chat("chat").into_arc();
        let (rag, _) = pipeline(chat.clone());
        rag.ingest_all(docs()).await;

        let err = rag.query(QueryRequest::new("  hi  ")).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidQuestion { min_len: 3 }));

        let req = QueryRequest {
            subject: Some("order 42".into()),
            language: Language::Arabic,
            ..QueryRequest::new("shipping time?")
        };
        let answer = rag.query(req).await.unwrap();
        assert_eq!(answer.references[0].id, "shipping");

        let messages = chat.last_messages();
        assert_eq!(messages[0].content, Language::Arabic.system_prompt());
        assert!(messages[1].content.starts_with("QUESTION: Focus on order 42. shipping time?"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingest_counts_failures() {
        let chat = MockProvider::chat("chat").into_arc();
        let (rag, embedder) = pipeline(chat);

        let report = rag
            .ingest_all(vec![
                UpsertItem::new("refund rules").with_id("a"),
                UpsertItem::new("   ").with_id("blank"),
                UpsertItem::new("an empty embedding").with_id("b"),
            ])
            .await;
        assert_eq!(report, IngestReport { indexed: 1, failed: 2 });
        assert_eq!(rag.index_stats().count, 1);
        // The blank document never reaches the embedder.
        assert_eq!(embedder.embed_calls(), 2);
    }
}
