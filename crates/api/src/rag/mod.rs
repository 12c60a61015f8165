//! RAG service facade.
//!
//! Owns the provider set and the (lazily constructed) retrieval store, and
//! exposes the operations the HTTP surface and the background indexer call.
//! `process_document` never errors — failures come back as an outcome object
//! so the indexer can record FAILED without special handling.

pub mod images;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{error, info};
use utoipa::ToSchema;

use mica_core::config::AppConfig;
use mica_inference::{Embedder, LlmCompleter, Reranker, VisionCompleter};

use crate::errors::ApiError;
use crate::retriever::{
    MultimodalItem, ParseMethod, QueryMode, QueryOptions, Retriever, RetrieverBuilder,
};

/// The configured providers, grouped for wiring and shutdown fan-out.
pub struct ProviderSet {
    pub llm: Arc<dyn LlmCompleter>,
    pub embedder: Arc<dyn Embedder>,
    pub vision: Option<Arc<dyn VisionCompleter>>,
    pub reranker: Option<Arc<dyn Reranker>>,
}

/// Result of one document-processing run. Mirrors the shape the HTTP
/// process endpoints return verbatim.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProcessOutcome {
    pub status: String,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessOutcome {
    fn success(file_path: &Path, output_dir: &Path) -> Self {
        Self {
            status: "success".to_string(),
            file_path: file_path.to_string_lossy().into_owned(),
            output_dir: Some(output_dir.to_string_lossy().into_owned()),
            error: None,
        }
    }

    fn failure(file_path: &Path, error: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            file_path: file_path.to_string_lossy().into_owned(),
            output_dir: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Summary of the service state for health/status endpoints.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServiceStatus {
    pub initialized: bool,
    pub working_dir: String,
    #[schema(value_type = Object)]
    pub models: Value,
}

/// High-level service facade over providers and the retrieval store.
pub struct RagService {
    working_dir: PathBuf,
    upload_dir: PathBuf,
    providers: ProviderSet,
    builder: Box<dyn RetrieverBuilder>,
    retriever: OnceCell<Arc<dyn Retriever>>,
    model_summary: Value,
}

impl RagService {
    pub fn new(config: &AppConfig, providers: ProviderSet, builder: Box<dyn RetrieverBuilder>) -> Self {
        let mut models = serde_json::json!({
            "llm": {
                "backend": config.llm.backend.as_str(),
                "model": config.llm.model_name,
            },
            "embedding": {
                "backend": config.embedding.backend.as_str(),
                "model": config.embedding.model_name,
                "dimension": providers.embedder.dim(),
            },
        });
        if let Some(vision) = &config.vision {
            models["vision"] = serde_json::json!({
                "backend": vision.backend.as_str(),
                "model": vision.model_name,
            });
        }
        if let Some(reranker) = &config.reranker {
            models["reranker"] = serde_json::json!({
                "enabled": reranker.enabled,
                "provider": reranker.provider,
            });
        }

        info!(
            llm = %config.llm.model_name,
            embedding = %config.embedding.model_name,
            vision = config.vision.as_ref().map(|v| v.model_name.as_str()),
            reranker = config.reranker.is_some(),
            "RAG service initialized"
        );

        Self {
            working_dir: config.storage.working_dir.clone(),
            upload_dir: config.storage.upload_dir.clone(),
            providers,
            builder,
            retriever: OnceCell::new(),
            model_summary: models,
        }
    }

    /// Get or lazily construct the retrieval store. Initialization runs at
    /// most once; concurrent callers wait on the same construction.
    pub async fn retriever(&self) -> Result<Arc<dyn Retriever>, ApiError> {
        self.retriever
            .get_or_try_init(|| async {
                info!("initializing retrieval store");
                self.builder.build().await
            })
            .await
            .cloned()
            .map_err(|e| ApiError::internal(format!("retrieval store initialization failed: {e}")))
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    fn default_output_dir(&self) -> PathBuf {
        self.working_dir.join("parsed_output")
    }

    /// Process one document. Errors are folded into the outcome so callers
    /// (notably the background indexer) handle success and failure
    /// uniformly.
    pub async fn process_document(
        &self,
        file_path: &Path,
        output_dir: Option<&Path>,
        parse_method: ParseMethod,
    ) -> ProcessOutcome {
        let retriever = match self.retriever().await {
            Ok(retriever) => retriever,
            Err(e) => return ProcessOutcome::failure(file_path, e.to_string()),
        };

        let output_dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_output_dir());

        info!(path = %file_path.display(), "processing document");
        match retriever
            .process_document(file_path, &output_dir, parse_method)
            .await
        {
            Ok(()) => {
                info!(path = %file_path.display(), "document processed successfully");
                ProcessOutcome::success(file_path, &output_dir)
            }
            Err(e) => {
                error!(path = %file_path.display(), error = %e, "failed to process document");
                ProcessOutcome::failure(file_path, e.to_string())
            }
        }
    }

    /// Execute a retrieval query. A non-string store response is a known
    /// degenerate case and maps to an internal error rather than junk
    /// output.
    pub async fn query(
        &self,
        query: &str,
        mode: QueryMode,
        opts: &QueryOptions,
    ) -> Result<String, ApiError> {
        let retriever = self.retriever().await?;

        info!(mode = mode.as_str(), "executing query");
        let response = retriever
            .query(query, mode, opts)
            .await
            .map_err(|e| ApiError::internal(format!("query failed: {e}")))?;

        expect_string_response(response)
    }

    /// Execute a multimodal query. Inline base64 images are persisted to the
    /// uploads tree and items rewritten to refer to the path before the
    /// store sees them.
    pub async fn query_with_multimodal(
        &self,
        query: &str,
        items: Vec<MultimodalItem>,
        mode: QueryMode,
        opts: &QueryOptions,
    ) -> Result<String, ApiError> {
        let retriever = self.retriever().await?;
        let items = self.prepare_multimodal_items(items).await?;

        info!(
            mode = mode.as_str(),
            items = items.len(),
            "executing multimodal query"
        );
        let response = retriever
            .query_with_multimodal(query, &items, mode, opts)
            .await
            .map_err(|e| ApiError::internal(format!("multimodal query failed: {e}")))?;

        expect_string_response(response)
    }

    /// Persist inline base64 payloads for image-bearing items and rewrite
    /// them to path references.
    async fn prepare_multimodal_items(
        &self,
        items: Vec<MultimodalItem>,
    ) -> Result<Vec<MultimodalItem>, ApiError> {
        let mut prepared = Vec::with_capacity(items.len());
        for mut item in items {
            let inline = matches!(item.item_type.as_str(), "image" | "table")
                && item.img_base64.is_some()
                && item.img_path.is_none();

            if inline {
                let payload = item.img_base64.take().unwrap_or_default();
                let (bytes, ext) = images::decode_image_base64(&payload)?;
                let path = images::persist_query_image(&bytes, &self.upload_dir, ext).await?;
                item.img_path = Some(path.to_string_lossy().into_owned());
            }
            prepared.push(item);
        }
        Ok(prepared)
    }

    /// Service status: initialization state, working dir, provider
    /// summaries.
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            initialized: self.retriever.get().is_some(),
            working_dir: self.working_dir.to_string_lossy().into_owned(),
            models: self.model_summary.clone(),
        }
    }

    /// Fan shutdown out to every provider.
    pub async fn shutdown(&self) {
        info!("shutting down RAG service");
        self.providers.embedder.shutdown().await;
        self.providers.llm.shutdown().await;
        if let Some(vision) = &self.providers.vision {
            vision.shutdown().await;
        }
        if let Some(reranker) = &self.providers.reranker {
            reranker.shutdown().await;
        }
        info!("RAG service shutdown complete");
    }
}

fn expect_string_response(response: Value) -> Result<String, ApiError> {
    match response {
        Value::String(text) => Ok(text),
        other => {
            error!(
                kind = %value_kind(&other),
                "retrieval pipeline returned a non-string response"
            );
            Err(ApiError::Internal(
                "query pipeline returned no response due to an internal error; check server logs"
                    .to_string(),
            ))
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Mock retriever plumbing shared by facade, indexer, and handler tests.

    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::retriever::{GraphEdgeData, GraphNodeData, GraphReader, KvReader};

    #[derive(Default)]
    pub struct MockKv(pub HashMap<String, Value>);

    #[async_trait]
    impl KvReader for MockKv {
        async fn list(&self) -> anyhow::Result<HashMap<String, Value>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    pub struct MockGraph {
        pub nodes: HashMap<String, GraphNodeData>,
        pub edges: HashMap<(String, String), GraphEdgeData>,
    }

    #[async_trait]
    impl GraphReader for MockGraph {
        async fn node(&self, id: &str) -> anyhow::Result<Option<GraphNodeData>> {
            Ok(self.nodes.get(id).cloned())
        }

        async fn edge(
            &self,
            source: &str,
            target: &str,
        ) -> anyhow::Result<Option<GraphEdgeData>> {
            Ok(self
                .edges
                .get(&(source.to_string(), target.to_string()))
                .or_else(|| self.edges.get(&(target.to_string(), source.to_string())))
                .cloned())
        }
    }

    /// Scriptable retriever: per-path process results and a fixed query
    /// response.
    pub struct MockRetriever {
        pub working_dir: PathBuf,
        pub fail_processing: Mutex<HashMap<String, String>>,
        pub processed: Mutex<Vec<String>>,
        pub query_response: Value,
        pub doc_status: MockKv,
        pub entities: MockKv,
        pub relations: MockKv,
        pub graph: MockGraph,
    }

    impl MockRetriever {
        pub fn new(working_dir: &Path) -> Self {
            Self {
                working_dir: working_dir.to_path_buf(),
                fail_processing: Mutex::new(HashMap::new()),
                processed: Mutex::new(Vec::new()),
                query_response: Value::String("mock answer".to_string()),
                doc_status: MockKv::default(),
                entities: MockKv::default(),
                relations: MockKv::default(),
                graph: MockGraph::default(),
            }
        }
    }

    #[async_trait]
    impl Retriever for MockRetriever {
        async fn process_document(
            &self,
            file_path: &Path,
            _output_dir: &Path,
            _parse_method: ParseMethod,
        ) -> anyhow::Result<()> {
            let name = file_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(message) = self.fail_processing.lock().unwrap().get(&name) {
                anyhow::bail!("{message}");
            }
            self.processed.lock().unwrap().push(name);
            Ok(())
        }

        async fn query(
            &self,
            _query: &str,
            _mode: QueryMode,
            _opts: &QueryOptions,
        ) -> anyhow::Result<Value> {
            Ok(self.query_response.clone())
        }

        async fn query_with_multimodal(
            &self,
            _query: &str,
            items: &[MultimodalItem],
            _mode: QueryMode,
            _opts: &QueryOptions,
        ) -> anyhow::Result<Value> {
            // Multimodal items must arrive with paths, never inline bytes.
            for item in items {
                anyhow::ensure!(
                    item.img_base64.is_none(),
                    "inline base64 leaked through to the store"
                );
            }
            Ok(self.query_response.clone())
        }

        fn doc_status(&self) -> &dyn KvReader {
            &self.doc_status
        }

        fn entities(&self) -> &dyn KvReader {
            &self.entities
        }

        fn relations(&self) -> &dyn KvReader {
            &self.relations
        }

        fn graph(&self) -> &dyn GraphReader {
            &self.graph
        }

        fn working_dir(&self) -> &Path {
            &self.working_dir
        }
    }

    pub struct FixedBuilder(pub Arc<dyn Retriever>);

    #[async_trait]
    impl RetrieverBuilder for FixedBuilder {
        async fn build(&self) -> anyhow::Result<Arc<dyn Retriever>> {
            Ok(Arc::clone(&self.0))
        }
    }

    /// Providers that never touch the network.
    pub fn stub_providers() -> ProviderSet {
        use futures_util::StreamExt;
        use mica_inference::{
            ChatMessage, CompletionOptions, EmbedParams, ProviderError,
        };

        struct StubEmbedder;

        #[async_trait]
        impl Embedder for StubEmbedder {
            async fn embed(
                &self,
                texts: Vec<String>,
                _params: &EmbedParams,
            ) -> Result<Vec<Vec<f32>>, ProviderError> {
                Ok(texts.iter().map(|_| vec![0.0, 1.0]).collect())
            }

            fn dim(&self) -> usize {
                2
            }
        }

        struct StubLlm;

        #[async_trait]
        impl LlmCompleter for StubLlm {
            async fn complete(
                &self,
                _prompt: &str,
                _system: Option<&str>,
                _history: &[ChatMessage],
                _opts: &CompletionOptions,
            ) -> Result<String, ProviderError> {
                Ok("stub".to_string())
            }

            async fn complete_stream(
                &self,
                _prompt: &str,
                _system: Option<&str>,
                _history: &[ChatMessage],
                _opts: &CompletionOptions,
            ) -> Result<
                futures_util::stream::BoxStream<'static, Result<String, ProviderError>>,
                ProviderError,
            > {
                Ok(futures_util::stream::iter(vec![Ok("stub".to_string())]).boxed())
            }
        }

        ProviderSet {
            llm: Arc::new(StubLlm),
            embedder: Arc::new(StubEmbedder),
            vision: None,
            reranker: None,
        }
    }

    pub fn test_config(root: &Path) -> AppConfig {
        use mica_core::config::{
            IndexingConfig, LogFormat, ObservabilityConfig, ServerConfig, StorageConfig,
        };
        use mica_core::models::{ModelConfig, ProviderBackend, ProviderKind};

        let model = |kind, name: &str| ModelConfig {
            kind,
            backend: ProviderBackend::Custom,
            model_name: name.to_string(),
            api_key: None,
            base_url: Some("http://localhost:9999/v1".to_string()),
            embedding_dim: Some(2),
            max_tokens: None,
            temperature: None,
            extra: Default::default(),
        };

        AppConfig {
            server: ServerConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                cors_allowed_origins: Vec::new(),
                shutdown_timeout_secs: 5,
            },
            storage: StorageConfig {
                working_dir: root.join("rag_storage"),
                upload_dir: root.join("uploads"),
                catalog_db_path: root.join("data/index_status.db"),
            },
            indexing: IndexingConfig {
                enabled: true,
                scan_interval: std::time::Duration::from_secs(60),
                max_files_per_batch: 5,
            },
            observability: ObservabilityConfig {
                service_name: "mica-test".to_string(),
                log_format: LogFormat::Pretty,
            },
            llm: model(ProviderKind::Llm, "stub-llm"),
            embedding: model(ProviderKind::Embedding, "stub-embedding"),
            vision: None,
            reranker: None,
        }
    }

    pub fn service_with(retriever: Arc<dyn Retriever>, config: &AppConfig) -> Arc<RagService> {
        Arc::new(RagService::new(
            config,
            stub_providers(),
            Box::new(FixedBuilder(retriever)),
        ))
    }
}
