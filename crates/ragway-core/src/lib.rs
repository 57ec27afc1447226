//! ragway-core: multi-provider LLM routing with an in-memory retrieval index.
//!
//! - [`config`]: typed configuration loading from JSON
//! - [`provider`]: the provider contract and the HTTP bindings
//! - [`breaker`]: per-provider circuit breaker
//! - [`router`]: strategy selection, failover and backoff
//! - [`store`]: normalized vectors and similarity search
//! - [`rag`]: grounded answering over the store
//! - [`ingest`]: document loaders
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ragway_core::config::Config;
//! use ragway_core::provider::registry_from_config;
//! use ragway_core::rag::{QueryRequest, RagPipeline};
//! use ragway_core::router::Router;
//! use ragway_core::store::{RouterEmbedder, UpsertItem, VectorStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let providers = registry_from_config(&config.providers, reqwest::Client::new());
//! let router = Arc::new(Router::new(
//!     providers,
//!     config.providers.policies(),
//!     config.router.settings(),
//! ));
//! let embedder = RouterEmbedder::new(router.clone(), config.rag.embed_fallback.clone());
//! let store = Arc::new(VectorStore::new(Arc::new(embedder)));
//! let rag = RagPipeline::with_config(router, store, config.rag.clone());
//!
//! rag.ingest_all(vec![UpsertItem::new("Refunds take 14 days.")]).await;
//! let answer = rag.query(QueryRequest::new("How long do refunds take?")).await?;
//! println!("{}", answer.response.output);
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod config;
pub mod error;
pub mod ingest;
pub mod provider;
pub mod rag;
pub mod router;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{GatewayError, Result};
