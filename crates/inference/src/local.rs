//! In-process model runtime adapters.
//!
//! The actual model execution lives in fastembed's ONNX runtime; this module
//! adapts it to the synchronous [`TextEncoder`] / [`CrossEncoder`] seams the
//! scheduler and providers consume. Execution providers (CUDA vs CPU) follow
//! the runtime build and `CUDA_VISIBLE_DEVICES`.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{
    EmbeddingModel, RerankInitOptions, RerankerModel, TextEmbedding, TextInitOptions, TextRerank,
};
use tracing::{info, warn};

use mica_core::models::ModelConfig;

use crate::error::ProviderError;
use crate::provider::{EmbedParams, Embedder, Reranker};
use crate::scheduler::{BatchScheduler, SchedulerConfig, TextEncoder};

/// Synchronous cross-encoder scoring seam for local reranking.
pub trait CrossEncoder: Send + Sync + 'static {
    /// Score `documents` against `query`, one score per document in input
    /// order.
    fn score(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<f32>>;

    fn model_name(&self) -> &str;
}

fn hf_cache_dir() -> Option<std::path::PathBuf> {
    std::env::var("HF_HOME").ok().map(std::path::PathBuf::from)
}

/// fastembed-backed text encoder.
pub struct FastembedEncoder {
    model: std::sync::Mutex<TextEmbedding>,
    model_name: String,
    dim: usize,
}

impl FastembedEncoder {
    /// Resolve the model code against fastembed's supported models and load
    /// it. The runtime self-reports its dimension, so `embedding_dim` in the
    /// config is optional for this backend.
    pub fn load(config: &ModelConfig) -> Result<Self, ProviderError> {
        let info = TextEmbedding::list_supported_models()
            .into_iter()
            .find(|m| m.model_code == config.model_name)
            .ok_or_else(|| {
                ProviderError::InvalidConfig(format!(
                    "unknown local embedding model: {}",
                    config.model_name
                ))
            })?;
        let dim = info.dim;

        if let Some(device) = config.device() {
            info!(
                model = %config.model_name,
                device,
                "loading local embedding model (execution providers follow the runtime build)"
            );
        } else {
            info!(model = %config.model_name, "loading local embedding model on CPU");
        }

        let mut options = TextInitOptions::new(info.model.clone());
        if let Some(cache_dir) = hf_cache_dir() {
            options = options.with_cache_dir(cache_dir);
        }

        let model = TextEmbedding::try_new(options).map_err(|e| {
            ProviderError::InvalidConfig(format!(
                "failed to load local embedding model {}: {e}",
                config.model_name
            ))
        })?;

        if let Some(configured) = config.embedding_dim {
            if configured != dim {
                warn!(
                    configured,
                    actual = dim,
                    "configured embedding_dim differs from the model's dimension; using the model's"
                );
            }
        }

        Ok(Self {
            model: std::sync::Mutex::new(model),
            model_name: config.model_name.clone(),
            dim,
        })
    }
}

impl TextEncoder for FastembedEncoder {
    fn encode(&self, texts: &[String], batch_size: Option<usize>) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding model mutex poisoned"))?;
        model
            .embed(texts.to_vec(), batch_size)
            .map_err(|e| anyhow::anyhow!("embedding generation failed: {e}"))
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Scheduler-backed local embedder: every `embed` call lands in the dynamic
/// batch scheduler and is coalesced with concurrent callers.
pub struct LocalEmbedder {
    scheduler: BatchScheduler,
}

impl LocalEmbedder {
    pub fn start(encoder: Arc<dyn TextEncoder>, config: SchedulerConfig) -> Self {
        Self {
            scheduler: BatchScheduler::start(encoder, config),
        }
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(
        &self,
        texts: Vec<String>,
        _params: &EmbedParams,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.scheduler.embed(texts).await
    }

    fn dim(&self) -> usize {
        self.scheduler.dim()
    }

    async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

/// fastembed-backed cross-encoder for local reranking.
pub struct FastrerankScorer {
    model: std::sync::Mutex<TextRerank>,
    model_name: String,
}

impl FastrerankScorer {
    pub fn load(model_name: &str, device: Option<&str>) -> Result<Self, ProviderError> {
        let model = resolve_reranker_model(model_name)?;

        if device.is_some_and(|d| d.starts_with("cuda")) {
            info!(model = model_name, "loading local reranker for GPU execution");
        } else {
            info!(model = model_name, "loading local reranker on CPU");
        }

        let mut options = RerankInitOptions::new(model);
        if let Some(cache_dir) = hf_cache_dir() {
            options = options.with_cache_dir(cache_dir);
        }

        let reranker = TextRerank::try_new(options).map_err(|e| {
            ProviderError::InvalidConfig(format!("failed to load reranker {model_name}: {e}"))
        })?;

        Ok(Self {
            model: std::sync::Mutex::new(reranker),
            model_name: model_name.to_string(),
        })
    }
}

impl CrossEncoder for FastrerankScorer {
    fn score(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<f32>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("reranker model mutex poisoned"))?;

        let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
        let results = model
            .rerank(query, docs, false, None)
            .map_err(|e| anyhow::anyhow!("reranking failed: {e}"))?;

        // The runtime returns results sorted by score; restore input order.
        let mut scores = vec![0.0f32; documents.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

fn resolve_reranker_model(model_name: &str) -> Result<RerankerModel, ProviderError> {
    match model_name {
        "BAAI/bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "BAAI/bge-reranker-v2-m3" => Ok(RerankerModel::BGERerankerV2M3),
        "jinaai/jina-reranker-v1-turbo-en" => Ok(RerankerModel::JINARerankerV1TurboEn),
        "jinaai/jina-reranker-v2-base-multilingual" => {
            Ok(RerankerModel::JINARerankerV2BaseMultiligual)
        }
        other => Err(ProviderError::InvalidConfig(format!(
            "unsupported local reranker model: {other}"
        ))),
    }
}

/// Reranker over a blocking cross-encoder; scoring runs off the async
/// runtime's worker threads.
pub struct LocalReranker {
    scorer: Arc<dyn CrossEncoder>,
}

impl LocalReranker {
    pub fn new(scorer: Arc<dyn CrossEncoder>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Reranker for LocalReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, ProviderError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let scorer = Arc::clone(&self.scorer);
        let query = query.to_string();
        let documents = documents.to_vec();
        tokio::task::spawn_blocking(move || scorer.score(&query, &documents))
            .await
            .map_err(|e| ProviderError::Encoder(format!("reranker task panicked: {e}")))?
            .map_err(|e| ProviderError::Encoder(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScorer;

    impl CrossEncoder for FixedScorer {
        fn score(&self, _query: &str, documents: &[String]) -> anyhow::Result<Vec<f32>> {
            Ok(documents.iter().map(|d| d.len() as f32).collect())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn local_reranker_preserves_input_order() {
        let reranker = LocalReranker::new(Arc::new(FixedScorer));
        let docs = vec!["aaa".to_string(), "a".to_string(), "aa".to_string()];

        let scores = reranker.rerank("query", &docs).await.unwrap();
        assert_eq!(scores, vec![3.0, 1.0, 2.0]);
    }

    #[tokio::test]
    async fn local_reranker_empty_docs_yield_empty_scores() {
        let reranker = LocalReranker::new(Arc::new(FixedScorer));
        let scores = reranker.rerank("query", &[]).await.unwrap();
        assert!(scores.is_empty());
    }

    #[test]
    fn unknown_reranker_model_is_rejected() {
        assert!(resolve_reranker_model("no/such-model").is_err());
    }
}
