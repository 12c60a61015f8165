//! JSON-file adapters for the KV and graph readout surfaces.
//!
//! Namespaces live as `kv_store_<name>.json` under the working directory,
//! one JSON object per file. A missing file is an empty namespace, not an
//! error — the store may simply not have produced that data yet.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{GraphEdgeData, GraphNodeData, GraphReader, KvReader};

/// KV namespace backed by one JSON object file.
pub struct JsonKvReader {
    path: PathBuf,
}

impl JsonKvReader {
    pub fn new(working_dir: &Path, namespace: &str) -> Self {
        Self {
            path: working_dir.join(format!("kv_store_{namespace}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KvReader for JsonKvReader {
    async fn list(&self) -> Result<HashMap<String, Value>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };

        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", self.path.display()))
    }
}

#[derive(Debug, Deserialize)]
struct StoredEdge {
    source: String,
    target: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_weight")]
    weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Graph readout over `graph_nodes.json` (name → attributes) and
/// `graph_edges.json` (array of {source, target, description, weight}).
pub struct JsonGraphReader {
    nodes_path: PathBuf,
    edges_path: PathBuf,
}

impl JsonGraphReader {
    pub fn new(working_dir: &Path) -> Self {
        Self {
            nodes_path: working_dir.join("graph_nodes.json"),
            edges_path: working_dir.join("graph_edges.json"),
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
        match tokio::fs::read(path).await {
            Ok(raw) => {
                serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}

#[async_trait]
impl GraphReader for JsonGraphReader {
    async fn node(&self, id: &str) -> Result<Option<GraphNodeData>> {
        let nodes: HashMap<String, GraphNodeData> = Self::read_json(&self.nodes_path).await?;
        Ok(nodes.get(id).cloned())
    }

    async fn edge(&self, source: &str, target: &str) -> Result<Option<GraphEdgeData>> {
        let edges: Vec<StoredEdge> = Self::read_json(&self.edges_path).await?;
        Ok(edges
            .into_iter()
            .find(|e| {
                (e.source == source && e.target == target)
                    || (e.source == target && e.target == source)
            })
            .map(|e| GraphEdgeData {
                description: e.description,
                weight: e.weight,
            }))
    }
}
