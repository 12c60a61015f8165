//! Capability contracts for model providers.
//!
//! Four small traits rather than a hierarchy: a provider implements exactly
//! the capabilities it has, and the factory returns the concrete adapter
//! behind a trait object. Every provider carries an idempotent `shutdown`.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Free-form named parameters forwarded by callers. Retrieval pipelines pass
/// scheduling hints (e.g. a priority tag) through this map; providers accept
/// and ignore anything they do not understand.
pub type EmbedParams = HashMap<String, serde_json::Value>;

/// One turn of conversation history for completion calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Generation options shared by completion providers.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Text embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning one vector per input text in input order.
    /// An empty input yields an empty matrix.
    async fn embed(
        &self,
        texts: Vec<String>,
        params: &EmbedParams,
    ) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Dimensionality of the returned vectors.
    fn dim(&self) -> usize;

    async fn shutdown(&self) {}
}

/// Document reranking capability. Score scale is provider-defined; higher
/// means more relevant.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `documents` against `query`, one score per document in input
    /// order. Empty documents yield empty scores.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, ProviderError>;

    async fn shutdown(&self) {}
}

/// Text completion capability.
#[async_trait]
pub trait LlmCompleter: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<String, ProviderError>;

    /// Streaming variant: a lazy finite sequence of deltas in generation
    /// order.
    async fn complete_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<String, ProviderError>>, ProviderError>;

    async fn shutdown(&self) {}
}

/// Vision-language completion capability. `images` are base64-encoded
/// payloads; an empty list reduces the call to plain text completion.
#[async_trait]
pub trait VisionCompleter: Send + Sync {
    async fn complete_with_images(
        &self,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
        opts: &CompletionOptions,
    ) -> Result<String, ProviderError>;

    async fn shutdown(&self) {}
}
