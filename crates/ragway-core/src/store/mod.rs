//! In-memory vector store.
//!
//! Chunks are kept in insertion order behind one `RwLock`. Vectors are
//! normalized to unit length on write, so search is a plain dot product.
//! The established dimension is the dimension of the first stored chunk.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::provider::types::EmbedOptions;
use crate::provider::Capability;
use crate::router::Router;

/// Turns texts into vectors, one per input, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// [`Embedder`] backed by the router's embedding path.
///
/// When routing fails and a fallback provider is set, that provider is
/// called directly, ignoring its breaker.
pub struct RouterEmbedder {
    router: Arc<Router>,
    fallback: Option<String>,
}

impl RouterEmbedder {
    pub fn new(router: Arc<Router>, fallback: Option<String>) -> Self {
        Self { router, fallback }
    }
}

#[async_trait]
impl Embedder for RouterEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let err = match self.router.embed(texts, &EmbedOptions::default()).await {
            Ok(res) => return Ok(res.vectors),
            Err(e) => e,
        };

        let Some(provider) = self
            .fallback
            .as_deref()
            .and_then(|id| self.router.provider(id))
            .filter(|p| p.supports(Capability::Embed))
        else {
            return Err(err);
        };

        warn!(provider = provider.id(), error = %err, "Embedding routing failed, using fallback");
        match provider.embed(texts, &EmbedOptions::default()).await {
            Ok(res) => Ok(res.vectors),
            Err(fallback_err) => {
                warn!(provider = provider.id(), error = %fallback_err, "Fallback embedding failed");
                Err(err)
            }
        }
    }
}

/// One indexed piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocChunk {
    pub id: String,
    pub text: String,
    #[serde(skip)]
    pub vector: Vec<f32>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// Input to [`VectorStore::upsert`]. A missing id gets a UUID v4.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsertItem {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,
}

impl UpsertItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = Some(meta);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub count: usize,
    /// `0` while the store is empty.
    pub dim: usize,
    pub sample_ids: Vec<String>,
}

const SAMPLE_IDS: usize = 10;

pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    chunks: RwLock<Vec<DocChunk>>,
}

impl VectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            chunks: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<DocChunk>> {
        self.chunks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<DocChunk>> {
        self.chunks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Embed and store `items` with one embedding call. Returns how many
    /// chunks were written. Empty vectors and dimension mismatches are
    /// skipped.
    pub async fn upsert(&self, items: Vec<UpsertItem>) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = items.iter().map(|i| i.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let mut chunks = self.write();
        let mut written = 0;
        let mut vectors = vectors.into_iter();

        for item in items {
            let id = item.id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let vector = vectors.next().unwrap_or_default();
            if vector.is_empty() {
                debug!(id = %id, "Skipping chunk without embedding");
                continue;
            }

            if let Some(dim) = chunks.first().map(|c| c.vector.len()) {
                if dim != vector.len() {
                    warn!(
                        id = %id,
                        got = vector.len(),
                        expected = dim,
                        "Vector dimension mismatch, skipping chunk"
                    );
                    continue;
                }
            }

            let chunk = DocChunk {
                id,
                text: item.text,
                vector: normalize(vector),
                meta: item.meta.unwrap_or_default(),
            };
            match chunks.iter_mut().find(|c| c.id == chunk.id) {
                Some(existing) => *existing = chunk,
                None => chunks.push(chunk),
            }
            written += 1;
        }

        debug!(written, total = chunks.len(), "Upsert complete");
        Ok(written)
    }

    /// Top `k` chunks by similarity to `query`, best first, each with a
    /// `score` entry added to its metadata. Never fails: embedding problems
    /// yield an empty result.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&(dyn Fn(&DocChunk) -> bool + Send + Sync)>,
    ) -> Vec<DocChunk> {
        if k == 0 || self.size() == 0 {
            return Vec::new();
        }

        let query_vec = match self.embedder.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Query embedding failed");
                return Vec::new();
            }
        };
        if query_vec.is_empty() {
            return Vec::new();
        }

        let chunks = self.read();
        if let Some(dim) = chunks.first().map(|c| c.vector.len()) {
            if dim != query_vec.len() {
                warn!(query_dim = query_vec.len(), store_dim = dim, "Query dimension differs from index");
            }
        }

        let mut scored: Vec<(f32, &DocChunk)> = chunks
            .iter()
            .filter(|&c| !c.vector.is_empty() && filter.map_or(true, |f| f(c)))
            .map(|c| (dot(&query_vec, &c.vector), c))
            .collect();
        // `sort_by` is stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        scored
            .into_iter()
            .take(k)
            .map(|(score, c)| {
                let mut hit = c.clone();
                hit.meta.insert("score".into(), Value::from(score));
                hit
            })
            .collect()
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut chunks = self.write();
        let before = chunks.len();
        chunks.retain(|c| c.id != id);
        chunks.len() != before
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn size(&self) -> usize {
        self.read().len()
    }

    pub fn get(&self, id: &str) -> Option<DocChunk> {
        self.read().iter().find(|c| c.id == id).cloned()
    }

    pub fn stats(&self) -> StoreStats {
        let chunks = self.read();
        StoreStats {
            count: chunks.len(),
            dim: chunks.first().map_or(0, |c| c.vector.len()),
            sample_ids: chunks.iter().take(SAMPLE_IDS).map(|c| c.id.clone()).collect(),
        }
    }
}

/// Scale to unit length. A zero vector is returned unchanged.
fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Dot product over the shorter of the two lengths.
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::router::{ProviderPolicy, RouterSettings, Strategy};
    use crate::testing::MockProvider;
    use std::collections::HashMap;

    /// Looks texts up in a fixed table; unknown texts embed to `[]`.
    struct TableEmbedder(HashMap<&'static str, Vec<f32>>);

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| self.0.get(t.as_str()).cloned().unwrap_or_default())
                .collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(GatewayError::EmbeddingUnavailable)
        }
    }

    fn store(table: &[(&'static str, Vec<f32>)]) -> VectorStore {
        VectorStore::new(Arc::new(TableEmbedder(table.iter().cloned().collect())))
    }

    fn meta(key: &str, value: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert(key.into(), Value::from(value));
        m
    }

    #[tokio::test]
    async fn test_upsert_normalizes_and_assigns_ids() {
        let s = store(&[("alpha", vec![3.0, 4.0])]);
        let written = s.upsert(vec![UpsertItem::new("alpha")]).await.unwrap();
        assert_eq!(written, 1);

        let stats = s.stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.dim, 2);
        let id = &stats.sample_ids[0];
        assert!(Uuid::parse_str(id).is_ok());

        let chunk = s.get(id).unwrap();
        assert!((chunk.vector[0] - 0.6).abs() < 1e-6);
        assert!((chunk.vector[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_upsert_same_id_replaces_in_place() {
        let s = store(&[("first", vec![1.0, 0.0]), ("second", vec![0.0, 1.0]), ("other", vec![1.0, 1.0])]);
        s.upsert(vec![UpsertItem::new("first").with_id("a"), UpsertItem::new("other").with_id("b")])
            .await
            .unwrap();
        s.upsert(vec![UpsertItem::new("second").with_id("a")]).await.unwrap();

        assert_eq!(s.size(), 2);
        assert_eq!(s.get("a").unwrap().text, "second");
        assert_eq!(s.stats().sample_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_upsert_skips_mismatch_and_empty() {
        let s = store(&[("two", vec![1.0, 0.0]), ("three", vec![1.0, 0.0, 0.0])]);
        s.upsert(vec![UpsertItem::new("two").with_id("a")]).await.unwrap();

        let written = s
            .upsert(vec![
                UpsertItem::new("three").with_id("b"),
                UpsertItem::new("unknown").with_id("c"),
            ])
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(s.size(), 1);
    }

    #[tokio::test]
    async fn test_upsert_propagates_embedder_failure() {
        let s = VectorStore::new(Arc::new(BrokenEmbedder));
        let err = s.upsert(vec![UpsertItem::new("x")]).await.unwrap_err();
        assert!(matches!(err, GatewayError::EmbeddingUnavailable));
        assert_eq!(s.size(), 0);
    }

    #[tokio::test]
    async fn test_search_returns_top_k_with_scores() {
        let s = store(&[
            ("north", vec![0.0, 1.0]),
            ("east", vec![1.0, 0.0]),
            ("northeast", vec![1.0, 1.0]),
            ("query", vec![0.2, 1.0]),
        ]);
        s.upsert(vec![
            UpsertItem::new("east").with_id("e"),
            UpsertItem::new("north").with_id("n"),
            UpsertItem::new("northeast").with_id("ne"),
        ])
        .await
        .unwrap();

        let hits = s.search("query", 2, None).await;
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["n", "ne"]);

        let s0 = hits[0].meta["score"].as_f64().unwrap();
        let s1 = hits[1].meta["score"].as_f64().unwrap();
        assert!(s0 >= s1);
    }

    #[tokio::test]
    async fn test_search_applies_filter_and_keeps_meta() {
        let s = store(&[("a", vec![1.0, 0.0]), ("b", vec![0.9, 0.1]), ("q", vec![1.0, 0.0])]);
        s.upsert(vec![
            UpsertItem::new("a").with_id("a").with_meta(meta("lang", "en")),
            UpsertItem::new("b").with_id("b").with_meta(meta("lang", "ar")),
        ])
        .await
        .unwrap();

        let only_ar = |c: &DocChunk| c.meta.get("lang").and_then(Value::as_str) == Some("ar");
        let hits = s.search("q", 5, Some(&only_ar)).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].meta["lang"], "ar");
        assert!(hits[0].meta.contains_key("score"));
    }

    #[tokio::test]
    async fn test_search_with_shorter_query_vector() {
        let s = store(&[("doc", vec![3.0, 0.0, 4.0]), ("q", vec![1.0])]);
        s.upsert(vec![UpsertItem::new("doc").with_id("d")]).await.unwrap();

        // Scored over the shared prefix only: [0.6, 0, 0.8] . [1.0]
        let hits = s.search("q", 5, None).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "d");
        let score = hits[0].meta["score"].as_f64().unwrap();
        assert!((score - 0.6).abs() < 1e-6, "score was {score}");
    }

    #[tokio::test]
    async fn test_search_degrades_to_empty() {
        let s = store(&[("doc", vec![1.0, 0.0])]);
        assert!(s.search("doc", 3, None).await.is_empty());

        s.upsert(vec![UpsertItem::new("doc")]).await.unwrap();
        // Unknown query text embeds to an empty vector.
        assert!(s.search("nothing", 3, None).await.is_empty());

        let broken = VectorStore::new(Arc::new(BrokenEmbedder));
        assert!(broken.search("doc", 3, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let s = store(&[("a", vec![1.0]), ("b", vec![2.0])]);
        s.upsert(vec![UpsertItem::new("a").with_id("a"), UpsertItem::new("b").with_id("b")])
            .await
            .unwrap();

        assert!(s.remove("a"));
        assert!(!s.remove("a"));
        assert_eq!(s.size(), 1);

        s.clear();
        assert_eq!(s.stats(), StoreStats { count: 0, dim: 0, sample_ids: vec![] });
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_embedder_uses_fallback_when_routing_fails() {
        let local = MockProvider::embedder("ollama")
            .embedding_with(|_| vec![0.5, 0.5])
            .into_arc();
        let router = Arc::new(Router::new(
            vec![local.clone() as Arc<dyn crate::provider::Provider>],
            vec![ProviderPolicy::new("ollama").with_enabled(false)],
            RouterSettings {
                strategy: Strategy::Failover,
                ..RouterSettings::default()
            },
        ));

        let without = RouterEmbedder::new(router.clone(), None);
        let err = without.embed(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, GatewayError::EmbeddingUnavailable));

        let with = RouterEmbedder::new(router, Some("ollama".into()));
        let vectors = with.embed(&["hi".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5]]);
        assert_eq!(local.embed_calls(), 1);
    }
}
