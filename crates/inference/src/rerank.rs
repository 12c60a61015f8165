//! Remote reranker adapters.
//!
//! The upstream provider is detected from base-url / model-name substrings
//! (jina | cohere | voyage | openai-compatible); each has its own request
//! and response shape. Responses are re-sorted by their index to recover
//! input order; missing scores are padded with zero, excess scores
//! truncated.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use mica_core::models::RerankerConfig;

use crate::error::ProviderError;
use crate::openai::post_json;
use crate::provider::Reranker;

/// Upstream rerank API families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankProviderKind {
    Jina,
    Cohere,
    Voyage,
    OpenaiCompatible,
}

impl RerankProviderKind {
    /// Detect the provider from the configured base URL, then the model
    /// name; anything unrecognized is treated as OpenAI-compatible.
    pub fn detect(base_url: Option<&str>, model_name: Option<&str>) -> Self {
        if let Some(url) = base_url.map(str::to_lowercase) {
            if url.contains("jina") {
                return Self::Jina;
            }
            if url.contains("cohere") {
                return Self::Cohere;
            }
            if url.contains("voyage") {
                return Self::Voyage;
            }
            if url.contains("openai") {
                return Self::OpenaiCompatible;
            }
        }

        if let Some(model) = model_name.map(str::to_lowercase) {
            if model.contains("jina") {
                return Self::Jina;
            }
            if model.contains("cohere") || model.contains("rerank") {
                return Self::Cohere;
            }
            if model.contains("voyage") {
                return Self::Voyage;
            }
        }

        Self::OpenaiCompatible
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Self::Jina => "https://api.jina.ai/v1/rerank",
            Self::Cohere => "https://api.cohere.ai/v1/rerank",
            Self::Voyage => "https://api.voyageai.com/v1/rerank",
            Self::OpenaiCompatible => "https://api.openai.com/v1/rerank",
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Jina => "jina",
            Self::Cohere => "cohere",
            Self::Voyage => "voyage",
            Self::OpenaiCompatible => "openai",
        }
    }
}

/// Remote rerank adapter.
pub struct RemoteReranker {
    kind: RerankProviderKind,
    model: String,
    api_key: String,
    url: String,
    batch_size: usize,
}

impl RemoteReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self, ProviderError> {
        let model = config.model_name.clone().ok_or_else(|| {
            ProviderError::InvalidConfig("remote reranker requires model_name".to_string())
        })?;
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::InvalidConfig("remote reranker requires api_key".to_string())
        })?;
        if config.batch_size == 0 {
            return Err(ProviderError::InvalidConfig(
                "reranker batch_size must be positive".to_string(),
            ));
        }

        let kind = RerankProviderKind::detect(config.base_url.as_deref(), Some(&model));
        let url = config
            .base_url
            .clone()
            .unwrap_or_else(|| kind.default_base_url().to_string());

        tracing::info!(
            provider = kind.as_str(),
            model = %model,
            url = %url,
            "initialized remote reranker"
        );

        Ok(Self {
            kind,
            model,
            api_key,
            url,
            batch_size: config.batch_size,
        })
    }

    fn build_request(&self, query: &str, documents: &[String]) -> Value {
        match self.kind {
            RerankProviderKind::Jina => json!({
                "model": self.model,
                "query": query,
                "documents": documents,
                "top_n": documents.len(),
            }),
            RerankProviderKind::Cohere => json!({
                "model": self.model,
                "query": query,
                "documents": documents,
                "top_n": documents.len(),
                "return_documents": false,
            }),
            RerankProviderKind::Voyage => json!({
                "model": self.model,
                "query": query,
                "documents": documents,
                "top_k": documents.len(),
            }),
            RerankProviderKind::OpenaiCompatible => json!({
                "model": self.model,
                "query": query,
                "documents": documents,
            }),
        }
    }

    fn parse_scores(&self, response: &Value, expected: usize) -> Result<Vec<f32>, ProviderError> {
        let (items, score_key) = match self.kind {
            RerankProviderKind::Jina | RerankProviderKind::Cohere => {
                (response.get("results"), "relevance_score")
            }
            RerankProviderKind::Voyage => (response.get("data"), "relevance_score"),
            RerankProviderKind::OpenaiCompatible => (response.get("results"), "score"),
        };

        let items = items.and_then(Value::as_array).ok_or_else(|| {
            ProviderError::UnexpectedResponse(format!(
                "{} rerank response missing results",
                self.kind.as_str()
            ))
        })?;

        // Results arrive sorted by relevance; re-sort by index to recover
        // the input order.
        let mut indexed: Vec<(u64, f32)> = items
            .iter()
            .map(|item| {
                let index = item.get("index").and_then(Value::as_u64).unwrap_or(0);
                let score = item.get(score_key).and_then(Value::as_f64).unwrap_or(0.0) as f32;
                (index, score)
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);

        let mut scores: Vec<f32> = indexed.into_iter().map(|(_, score)| score).collect();
        if scores.len() != expected {
            warn!(
                expected,
                received = scores.len(),
                provider = self.kind.as_str(),
                "rerank score count mismatch; padding with zeros"
            );
        }
        // Missing scores are padded with zero; excess scores are truncated.
        scores.resize(expected, 0.0);

        Ok(scores)
    }
}

#[async_trait]
impl Reranker for RemoteReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, ProviderError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut scores = Vec::with_capacity(documents.len());
        for chunk in documents.chunks(self.batch_size) {
            let body = self.build_request(query, chunk);
            let response =
                post_json("remote_rerank", &self.url, Some(&self.api_key), &body).await?;
            scores.extend(self.parse_scores(&response, chunk.len())?);
        }
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reranker(kind_url: Option<&str>, model: &str) -> RemoteReranker {
        RemoteReranker::new(&RerankerConfig {
            enabled: true,
            provider: "api".to_string(),
            model_name: Some(model.to_string()),
            device: None,
            api_key: Some("key".to_string()),
            base_url: kind_url.map(ToString::to_string),
            batch_size: 16,
        })
        .unwrap()
    }

    #[test]
    fn provider_detection_prefers_base_url() {
        assert_eq!(
            RerankProviderKind::detect(Some("https://api.cohere.ai/v1/rerank"), Some("jina-x")),
            RerankProviderKind::Cohere
        );
        assert_eq!(
            RerankProviderKind::detect(None, Some("voyage-rerank-2")),
            RerankProviderKind::Voyage
        );
        assert_eq!(
            RerankProviderKind::detect(None, Some("some-model")),
            RerankProviderKind::OpenaiCompatible
        );
    }

    #[test]
    fn request_shapes_match_provider() {
        let jina = reranker(None, "jina-reranker-v2");
        let body = jina.build_request("q", &["a".to_string(), "b".to_string()]);
        assert_eq!(body["top_n"], 2);
        assert!(body.get("return_documents").is_none());

        let cohere = reranker(Some("https://api.cohere.ai/v1/rerank"), "rerank-3");
        let body = cohere.build_request("q", &["a".to_string()]);
        assert_eq!(body["return_documents"], false);

        let voyage = reranker(Some("https://api.voyageai.com/v1/rerank"), "rerank-2");
        let body = voyage.build_request("q", &["a".to_string(), "b".to_string()]);
        assert_eq!(body["top_k"], 2);
        assert!(body.get("top_n").is_none());
    }

    #[test]
    fn scores_resorted_by_index_and_padded() {
        let jina = reranker(None, "jina-reranker-v2");
        // Provider returns results sorted by relevance, not input order,
        // and drops one document entirely.
        let response = json!({
            "results": [
                {"index": 2, "relevance_score": 0.9},
                {"index": 0, "relevance_score": 0.4},
            ]
        });
        let scores = jina.parse_scores(&response, 3).unwrap();
        // Re-sorted by index, then padded with zero up to the expected count.
        assert_eq!(scores, vec![0.4, 0.9, 0.0]);
    }

    #[test]
    fn openai_shape_uses_score_key() {
        let openai = reranker(Some("https://api.openai.com/v1/rerank"), "model");
        let response = json!({
            "results": [
                {"index": 0, "score": 0.7},
                {"index": 1, "score": 0.2},
            ]
        });
        let scores = openai.parse_scores(&response, 2).unwrap();
        assert_eq!(scores, vec![0.7, 0.2]);
    }

    #[test]
    fn excess_scores_are_truncated() {
        let jina = reranker(None, "jina-reranker-v2");
        let response = json!({
            "results": [
                {"index": 7, "relevance_score": 0.9},
                {"index": 0, "relevance_score": 0.5},
                {"index": 1, "relevance_score": 0.6},
            ]
        });
        let scores = jina.parse_scores(&response, 2).unwrap();
        assert_eq!(scores, vec![0.5, 0.6]);
    }
}
