//! Jina AI embedding adapter.
//!
//! Speaks the OpenAI-ish embeddings wire shape but MUST NOT send
//! `encoding_format`, which the Jina API rejects. A small allow-list of
//! Jina-specific parameters is forwarded from the config and per-call
//! params.

use async_trait::async_trait;
use serde_json::json;

use mica_core::models::ModelConfig;

use crate::error::ProviderError;
use crate::openai::post_json;
use crate::provider::{EmbedParams, Embedder};

const DEFAULT_BASE_URL: &str = "https://api.jina.ai/v1/embeddings";

/// Parameters the Jina embeddings API understands beyond model/input.
const SUPPORTED_PARAMS: &[&str] = &["task", "dimensions", "late_chunking", "embedding_type"];

pub struct JinaEmbedder {
    model: String,
    api_key: String,
    url: String,
    dim: usize,
    config_params: EmbedParams,
}

impl JinaEmbedder {
    pub fn new(config: &ModelConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ProviderError::InvalidConfig("Jina embedding adapter requires an API key".to_string())
        })?;
        let dim = config.embedding_dim.ok_or_else(|| {
            ProviderError::InvalidConfig(format!(
                "remote embedding model '{}' requires embedding_dim",
                config.model_name
            ))
        })?;

        let config_params = config
            .extra
            .iter()
            .filter(|(key, _)| SUPPORTED_PARAMS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            model: config.model_name.clone(),
            api_key,
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            dim,
            config_params,
        })
    }
}

#[async_trait]
impl Embedder for JinaEmbedder {
    async fn embed(
        &self,
        texts: Vec<String>,
        params: &EmbedParams,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // No encoding_format here: Jina does not accept it.
        let mut body = json!({
            "model": self.model,
            "input": texts,
        });
        for (key, value) in &self.config_params {
            body[key] = value.clone();
        }
        for (key, value) in params {
            if SUPPORTED_PARAMS.contains(&key.as_str()) {
                body[key.as_str()] = value.clone();
            }
        }

        let response = post_json("jina_embed", &self.url, Some(&self.api_key), &body).await?;

        let data = response
            .get("data")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| {
                ProviderError::UnexpectedResponse("missing data array in Jina response".to_string())
            })?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .cloned()
                .and_then(|v| serde_json::from_value::<Vec<f32>>(v).ok())
                .ok_or_else(|| {
                    ProviderError::UnexpectedResponse(
                        "missing embedding in Jina response".to_string(),
                    )
                })?;
            embeddings.push(embedding);
        }
        Ok(embeddings)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mica_core::models::{ProviderBackend, ProviderKind};
    use std::collections::HashMap;

    fn jina_config() -> ModelConfig {
        ModelConfig {
            kind: ProviderKind::Embedding,
            backend: ProviderBackend::Jina,
            model_name: "jina-embeddings-v3".to_string(),
            api_key: Some("key".to_string()),
            base_url: None,
            embedding_dim: Some(1024),
            max_tokens: None,
            temperature: None,
            extra: HashMap::from([
                ("task".to_string(), serde_json::Value::from("retrieval.passage")),
                ("device".to_string(), serde_json::Value::from("cpu")),
            ]),
        }
    }

    #[test]
    fn only_allow_listed_extras_are_kept() {
        let embedder = JinaEmbedder::new(&jina_config()).unwrap();
        assert!(embedder.config_params.contains_key("task"));
        assert!(!embedder.config_params.contains_key("device"));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let mut config = jina_config();
        config.api_key = None;
        assert!(matches!(
            JinaEmbedder::new(&config),
            Err(ProviderError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn empty_input_yields_empty_matrix() {
        let embedder = JinaEmbedder::new(&jina_config()).unwrap();
        let rows = embedder.embed(Vec::new(), &EmbedParams::new()).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(embedder.dim(), 1024);
    }
}
