//! The retrieval-store seam.
//!
//! The knowledge store is an external collaborator; the server consumes it
//! through these traits only. The KV readout is a single `list()` surface —
//! adapters convert whatever storage shape they wrap into one map.

pub mod engine;
pub mod json_kv;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use mica_inference::ChatMessage;

/// Parsing strategy requested for a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParseMethod {
    #[default]
    Auto,
    Ocr,
    Txt,
}

/// Retrieval mode for queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Naive,
    Local,
    Global,
    #[default]
    Hybrid,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Naive => "naive",
            QueryMode::Local => "local",
            QueryMode::Global => "global",
            QueryMode::Hybrid => "hybrid",
        }
    }
}

/// Optional query parameters forwarded to the store.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub top_k: Option<usize>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub conversation_history: Vec<ChatMessage>,
}

/// One multimodal content item: an image, a table, or an equation. Images
/// arrive either as a filesystem path or inline base64 (persisted to disk
/// before the store sees them).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MultimodalItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equation_caption: Option<String>,
}

/// Uniform read surface over a KV namespace.
#[async_trait]
pub trait KvReader: Send + Sync {
    /// Dump the namespace as one map of key → value.
    async fn list(&self) -> anyhow::Result<HashMap<String, Value>>;
}

/// Node attributes as stored in the knowledge graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphNodeData {
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Edge attributes as stored in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdgeData {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Read surface over the knowledge graph.
#[async_trait]
pub trait GraphReader: Send + Sync {
    async fn node(&self, id: &str) -> anyhow::Result<Option<GraphNodeData>>;
    /// Edge lookup is direction-insensitive.
    async fn edge(&self, source: &str, target: &str) -> anyhow::Result<Option<GraphEdgeData>>;
}

/// The external retrieval store, seen through the surface the server needs:
/// document processing, querying, and the KV/graph readout.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn process_document(
        &self,
        file_path: &Path,
        output_dir: &Path,
        parse_method: ParseMethod,
    ) -> anyhow::Result<()>;

    /// A well-behaved store answers with a string; anything else is a
    /// documented failure mode the facade turns into an internal error.
    async fn query(
        &self,
        query: &str,
        mode: QueryMode,
        opts: &QueryOptions,
    ) -> anyhow::Result<Value>;

    async fn query_with_multimodal(
        &self,
        query: &str,
        items: &[MultimodalItem],
        mode: QueryMode,
        opts: &QueryOptions,
    ) -> anyhow::Result<Value>;

    /// Per-document processing status records.
    fn doc_status(&self) -> &dyn KvReader;

    /// Per-document entity-name records (`{doc_id: {entity_names: [...]}}`).
    fn entities(&self) -> &dyn KvReader;

    /// Per-document relation-pair records (`{doc_id: {relation_pairs: [[s,t], ...]}}`).
    fn relations(&self) -> &dyn KvReader;

    fn graph(&self) -> &dyn GraphReader;

    fn working_dir(&self) -> &Path;
}

/// Constructs the retriever on first use; the facade calls this lazily.
#[async_trait]
pub trait RetrieverBuilder: Send + Sync {
    async fn build(&self) -> anyhow::Result<std::sync::Arc<dyn Retriever>>;
}
