//! Model provider configuration.
//!
//! A provider is addressed by (kind, backend, model name) plus optional
//! credentials, base URL, embedding dimension, and a free-form extra-params
//! map for backend-specific settings (device, batch limits, ...).

use std::collections::HashMap;
use std::env;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Model capability kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Llm,
    Vision,
    Embedding,
    Reranker,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Llm => "llm",
            ProviderKind::Vision => "vision",
            ProviderKind::Embedding => "embedding",
            ProviderKind::Reranker => "reranker",
        }
    }
}

/// Where a model runs and which wire protocol it speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderBackend {
    /// OpenAI commercial API.
    Openai,
    /// Anthropic commercial API.
    Anthropic,
    /// Jina AI commercial API.
    Jina,
    /// Any self-hosted OpenAI-compatible API (vLLM, LM Studio, ...).
    Custom,
    /// Legacy value for local HTTP servers (Ollama etc.). Speaks the
    /// OpenAI-compatible protocol; see [`ModelConfig::effective_backend`]
    /// for the embedding + CUDA-device migration shape.
    Local,
    /// In-process model runtime (embedding / reranking only).
    LocalGpu,
}

impl ProviderBackend {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" | "azure" => Ok(ProviderBackend::Openai),
            "anthropic" => Ok(ProviderBackend::Anthropic),
            "jina" => Ok(ProviderBackend::Jina),
            "custom" => Ok(ProviderBackend::Custom),
            "local" => Ok(ProviderBackend::Local),
            "local_gpu" => Ok(ProviderBackend::LocalGpu),
            other => bail!("unsupported provider backend: {other}"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderBackend::Openai => "openai",
            ProviderBackend::Anthropic => "anthropic",
            ProviderBackend::Jina => "jina",
            ProviderBackend::Custom => "custom",
            ProviderBackend::Local => "local",
            ProviderBackend::LocalGpu => "local_gpu",
        }
    }

    /// Remote commercial APIs require a credential; self-hosted and
    /// in-process backends do not.
    pub fn requires_credential(&self) -> bool {
        matches!(
            self,
            ProviderBackend::Openai | ProviderBackend::Anthropic | ProviderBackend::Jina
        )
    }
}

/// Configuration for a single model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub kind: ProviderKind,
    pub backend: ProviderBackend,
    pub model_name: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Required for embedding backends that cannot self-report dimension
    /// (all remote ones).
    pub embedding_dim: Option<usize>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Backend-specific settings: device, max_batch_size, max_wait_time,
    /// max_batch_tokens, encode_batch_size, ...
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ModelConfig {
    /// Load a model configuration from `{PREFIX}_*` environment variables.
    ///
    /// Example:
    ///   EMBEDDING_BACKEND=local_gpu
    ///   EMBEDDING_MODEL_NAME=BAAI/bge-small-en-v1.5
    ///   EMBEDDING_DEVICE=cuda:0
    ///   EMBEDDING_MAX_BATCH_SIZE=32
    ///   EMBEDDING_MAX_WAIT_TIME=0.1
    pub fn from_env(prefix: &str, kind: ProviderKind) -> Result<Self> {
        let backend = ProviderBackend::parse(
            &env::var(format!("{prefix}_BACKEND")).unwrap_or_else(|_| "openai".to_string()),
        )?;

        let model_name = env::var(format!("{prefix}_MODEL_NAME"))
            .map(|v| v.trim().to_string())
            .ok()
            .filter(|v| !v.is_empty());
        let Some(model_name) = model_name else {
            bail!("missing required env var: {prefix}_MODEL_NAME");
        };

        let api_key = env::var(format!("{prefix}_API_KEY"))
            .ok()
            .filter(|v| !v.is_empty());
        let base_url = env::var(format!("{prefix}_BASE_URL"))
            .ok()
            .filter(|v| !v.is_empty());

        let embedding_dim = parse_env(&format!("{prefix}_EMBEDDING_DIM"))?;
        let max_tokens = parse_env(&format!("{prefix}_MAX_TOKENS"))?;
        let temperature = parse_env(&format!("{prefix}_TEMPERATURE"))?;

        let mut extra = HashMap::new();
        if let Ok(device) = env::var(format!("{prefix}_DEVICE")) {
            if !device.is_empty() {
                extra.insert("device".to_string(), serde_json::Value::from(device));
            }
        }
        for key in ["MAX_BATCH_SIZE", "MAX_BATCH_TOKENS", "ENCODE_BATCH_SIZE"] {
            if let Some(value) = parse_env::<u64>(&format!("{prefix}_{key}"))? {
                extra.insert(key.to_lowercase(), serde_json::Value::from(value));
            }
        }
        if let Some(value) = parse_env::<f64>(&format!("{prefix}_MAX_WAIT_TIME"))? {
            extra.insert("max_wait_time".to_string(), serde_json::Value::from(value));
        }

        let config = Self {
            kind,
            backend,
            model_name,
            api_key,
            base_url,
            embedding_dim,
            max_tokens,
            temperature,
            extra,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the invariants of the (kind, backend) combination.
    pub fn validate(&self) -> Result<()> {
        if self.backend == ProviderBackend::LocalGpu
            && !matches!(self.kind, ProviderKind::Embedding | ProviderKind::Reranker)
        {
            bail!(
                "local_gpu backend is only valid for embedding or reranker models, got {}",
                self.kind.as_str()
            );
        }

        if self.backend.requires_credential() && self.api_key.is_none() {
            bail!(
                "{} backend requires an API key for model '{}'",
                self.backend.as_str(),
                self.model_name
            );
        }

        if self.kind == ProviderKind::Embedding
            && self.effective_backend() != ProviderBackend::LocalGpu
            && self.embedding_dim.is_none()
        {
            bail!(
                "remote embedding model '{}' requires embedding_dim",
                self.model_name
            );
        }

        Ok(())
    }

    /// Resolve the legacy configuration shape: `local` backend with a CUDA
    /// device string and no base URL predates the explicit `local_gpu`
    /// value and is still accepted for embedding models.
    pub fn effective_backend(&self) -> ProviderBackend {
        if self.backend == ProviderBackend::Local
            && self.kind == ProviderKind::Embedding
            && self.base_url.is_none()
            && self.device().is_some_and(|d| d.starts_with("cuda"))
        {
            return ProviderBackend::LocalGpu;
        }
        self.backend
    }

    pub fn device(&self) -> Option<&str> {
        self.extra.get("device").and_then(|v| v.as_str())
    }

    /// Jina adapters are selected by markers in the model name or base URL.
    pub fn has_jina_markers(&self) -> bool {
        self.backend == ProviderBackend::Jina
            || self.model_name.to_lowercase().contains("jina")
            || self
                .base_url
                .as_deref()
                .is_some_and(|url| url.to_lowercase().contains("jina.ai"))
    }

    pub fn extra_usize(&self, key: &str) -> Option<usize> {
        self.extra.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
    }

    pub fn extra_f64(&self, key: &str) -> Option<f64> {
        self.extra.get(key).and_then(|v| v.as_f64())
    }
}

/// Configuration for the optional reranking model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub enabled: bool,
    /// "local" (in-process, device decides CPU/GPU) or "api" (remote).
    pub provider: String,
    pub model_name: Option<String>,
    pub device: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub batch_size: usize,
}

impl RerankerConfig {
    pub fn from_env() -> Result<Self> {
        let enabled = env::var("RERANKER_ENABLED")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);
        let mut provider =
            env::var("RERANKER_PROVIDER").unwrap_or_else(|_| "local".to_string());
        // local_gpu is an alias; the device string decides CPU vs GPU.
        if provider == "local_gpu" {
            provider = "local".to_string();
        }

        Ok(Self {
            enabled,
            provider,
            model_name: env::var("RERANKER_MODEL_NAME").ok().filter(|v| !v.is_empty()),
            device: env::var("RERANKER_DEVICE").ok().filter(|v| !v.is_empty()),
            api_key: env::var("RERANKER_API_KEY").ok().filter(|v| !v.is_empty()),
            base_url: env::var("RERANKER_BASE_URL").ok().filter(|v| !v.is_empty()),
            batch_size: parse_env("RERANKER_BATCH_SIZE")?.unwrap_or(16),
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => match raw.parse::<T>() {
            Ok(value) => Ok(Some(value)),
            Err(e) => bail!("invalid value for {name}: {e}"),
        },
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding_config(backend: ProviderBackend) -> ModelConfig {
        ModelConfig {
            kind: ProviderKind::Embedding,
            backend,
            model_name: "test-model".to_string(),
            api_key: Some("key".to_string()),
            base_url: None,
            embedding_dim: Some(384),
            max_tokens: None,
            temperature: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn local_gpu_rejected_for_llm() {
        let config = ModelConfig {
            kind: ProviderKind::Llm,
            ..embedding_config(ProviderBackend::LocalGpu)
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn remote_embedding_requires_dimension() {
        let mut config = embedding_config(ProviderBackend::Openai);
        config.embedding_dim = None;
        assert!(config.validate().is_err());

        config.embedding_dim = Some(1536);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn commercial_backend_requires_credential() {
        let mut config = embedding_config(ProviderBackend::Jina);
        config.api_key = None;
        assert!(config.validate().is_err());

        let mut config = embedding_config(ProviderBackend::Custom);
        config.api_key = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn legacy_local_cuda_shape_maps_to_local_gpu() {
        let mut config = embedding_config(ProviderBackend::Local);
        config.extra.insert(
            "device".to_string(),
            serde_json::Value::from("cuda:0"),
        );
        assert_eq!(config.effective_backend(), ProviderBackend::LocalGpu);

        // A base_url means a local HTTP server, not the in-process runtime.
        config.base_url = Some("http://localhost:11434/v1".to_string());
        assert_eq!(config.effective_backend(), ProviderBackend::Local);
    }

    #[test]
    fn jina_markers_detected_from_name_and_url() {
        let mut config = embedding_config(ProviderBackend::Custom);
        assert!(!config.has_jina_markers());

        config.model_name = "jina-embeddings-v3".to_string();
        assert!(config.has_jina_markers());

        config.model_name = "plain".to_string();
        config.base_url = Some("https://api.jina.ai/v1/embeddings".to_string());
        assert!(config.has_jina_markers());
    }
}
