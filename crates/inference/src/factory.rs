//! Provider factory: maps (kind, backend) configurations onto concrete
//! adapter implementations.

use std::sync::Arc;

use mica_core::models::{ModelConfig, ProviderBackend, ProviderKind, RerankerConfig};

use crate::error::ProviderError;
use crate::jina::JinaEmbedder;
use crate::local::{FastembedEncoder, FastrerankScorer, LocalEmbedder, LocalReranker};
use crate::openai::{OpenAiCompleter, OpenAiEmbedder, OpenAiVisionCompleter};
use crate::provider::{Embedder, LlmCompleter, Reranker, VisionCompleter};
use crate::rerank::RemoteReranker;
use crate::scheduler::SchedulerConfig;

fn expect_kind(config: &ModelConfig, kind: ProviderKind) -> Result<(), ProviderError> {
    if config.kind != kind {
        return Err(ProviderError::InvalidConfig(format!(
            "expected a {} model, got {}",
            kind.as_str(),
            config.kind.as_str()
        )));
    }
    Ok(())
}

/// Create an embedding provider.
///
/// - local-GPU backend: scheduler-backed in-process embedder.
/// - remote with Jina markers in the model name or base URL: Jina adapter.
/// - anything else: OpenAI-compatible adapter.
pub fn create_embedder(config: &ModelConfig) -> Result<Arc<dyn Embedder>, ProviderError> {
    expect_kind(config, ProviderKind::Embedding)?;
    config
        .validate()
        .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;

    if config.effective_backend() == ProviderBackend::LocalGpu {
        if config.backend != ProviderBackend::LocalGpu {
            tracing::warn!(
                model = %config.model_name,
                "embedding backend configured as 'local' with a cuda device and no base_url; \
                 treating as local_gpu. Prefer EMBEDDING_BACKEND=local_gpu explicitly."
            );
        }
        let encoder = Arc::new(FastembedEncoder::load(config)?);
        let scheduler_config = SchedulerConfig::from_model_config(config);
        return Ok(Arc::new(LocalEmbedder::start(encoder, scheduler_config)));
    }

    if config.has_jina_markers() {
        return Ok(Arc::new(JinaEmbedder::new(config)?));
    }

    Ok(Arc::new(OpenAiEmbedder::new(config)?))
}

/// Create an LLM completion provider.
pub fn create_llm(config: &ModelConfig) -> Result<Arc<dyn LlmCompleter>, ProviderError> {
    expect_kind(config, ProviderKind::Llm)?;
    config
        .validate()
        .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;

    match config.backend {
        ProviderBackend::Anthropic => Err(ProviderError::InvalidConfig(
            "anthropic LLM backend is not implemented; use an openai-compatible endpoint"
                .to_string(),
        )),
        ProviderBackend::LocalGpu => Err(ProviderError::InvalidConfig(
            "local_gpu backend is not valid for LLM models".to_string(),
        )),
        _ => Ok(Arc::new(OpenAiCompleter::new(config))),
    }
}

/// Create a vision-language provider.
pub fn create_vision(config: &ModelConfig) -> Result<Arc<dyn VisionCompleter>, ProviderError> {
    expect_kind(config, ProviderKind::Vision)?;
    config
        .validate()
        .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;

    match config.backend {
        ProviderBackend::Anthropic => Err(ProviderError::InvalidConfig(
            "anthropic vision backend is not implemented; use an openai-compatible endpoint"
                .to_string(),
        )),
        ProviderBackend::LocalGpu => Err(ProviderError::InvalidConfig(
            "local_gpu backend is not valid for vision models".to_string(),
        )),
        _ => Ok(Arc::new(OpenAiVisionCompleter::new(config))),
    }
}

/// Create the optional reranker.
///
/// - local with a CUDA device hint: in-process reranker on the GPU runtime.
/// - local otherwise: in-process CPU cross-encoder.
/// - api: remote adapter with provider detection.
pub fn create_reranker(
    config: &RerankerConfig,
) -> Result<Option<Arc<dyn Reranker>>, ProviderError> {
    if !config.enabled {
        return Ok(None);
    }

    match config.provider.as_str() {
        "local" => {
            let model_name = config.model_name.as_deref().ok_or_else(|| {
                ProviderError::InvalidConfig("local reranker requires model_name".to_string())
            })?;
            let scorer = Arc::new(FastrerankScorer::load(model_name, config.device.as_deref())?);
            Ok(Some(Arc::new(LocalReranker::new(scorer))))
        }
        "api" => Ok(Some(Arc::new(RemoteReranker::new(config)?))),
        other => Err(ProviderError::InvalidConfig(format!(
            "unknown reranker provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn model(kind: ProviderKind, backend: ProviderBackend) -> ModelConfig {
        ModelConfig {
            kind,
            backend,
            model_name: "gpt-test".to_string(),
            api_key: Some("key".to_string()),
            base_url: Some("http://localhost:9000/v1".to_string()),
            embedding_dim: Some(768),
            max_tokens: None,
            temperature: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let config = model(ProviderKind::Llm, ProviderBackend::Custom);
        assert!(create_embedder(&config).is_err());
    }

    #[test]
    fn anthropic_llm_is_not_implemented() {
        let config = model(ProviderKind::Llm, ProviderBackend::Anthropic);
        assert!(matches!(
            create_llm(&config),
            Err(ProviderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn remote_embedder_selected_for_custom_backend() {
        let config = model(ProviderKind::Embedding, ProviderBackend::Custom);
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dim(), 768);
    }

    #[test]
    fn jina_markers_route_to_jina_adapter() {
        let mut config = model(ProviderKind::Embedding, ProviderBackend::Custom);
        config.base_url = Some("https://api.jina.ai/v1/embeddings".to_string());
        // Construction succeeding is enough here; the wire difference is
        // covered by the adapter's own tests.
        assert!(create_embedder(&config).is_ok());
    }

    #[test]
    fn disabled_reranker_yields_none() {
        let config = RerankerConfig {
            enabled: false,
            provider: "local".to_string(),
            model_name: None,
            device: None,
            api_key: None,
            base_url: None,
            batch_size: 16,
        };
        assert!(create_reranker(&config).unwrap().is_none());
    }
}
