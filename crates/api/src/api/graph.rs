//! Knowledge graph endpoints: visualization data and summary statistics.
//!
//! Node selection is the union of entity names across per-document entity
//! records, truncated to `limit`; edge selection is the union of relation
//! pairs, truncated to `2 * limit`. Entries missing from the graph store
//! are skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use actix_web::{HttpResponse, get, web, web::Data};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::errors::ApiError;
use crate::rag::RagService;
use crate::retriever::Retriever;

#[derive(Debug, Deserialize)]
pub struct GraphDataQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_metadata: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub label: String,
    pub weight: f64,
    #[schema(value_type = Object)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GraphDataResponse {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    #[schema(value_type = Object)]
    pub stats: Value,
}

/// Union of entity names across the per-document entity records.
async fn collect_entity_names(retriever: &dyn Retriever) -> anyhow::Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for doc in retriever.entities().list().await?.values() {
        if let Some(entity_names) = doc.get("entity_names").and_then(Value::as_array) {
            for name in entity_names {
                if let Some(name) = name.as_str() {
                    names.insert(name.to_string());
                }
            }
        }
    }
    Ok(names)
}

/// Union of relation pairs across the per-document relation records.
async fn collect_relation_pairs(
    retriever: &dyn Retriever,
) -> anyhow::Result<BTreeSet<(String, String)>> {
    let mut pairs = BTreeSet::new();
    for doc in retriever.relations().list().await?.values() {
        if let Some(relation_pairs) = doc.get("relation_pairs").and_then(Value::as_array) {
            for pair in relation_pairs {
                if let Some(pair) = pair.as_array() {
                    if let (Some(source), Some(target)) =
                        (pair.first().and_then(Value::as_str), pair.get(1).and_then(Value::as_str))
                    {
                        pairs.insert((source.to_string(), target.to_string()));
                    }
                }
            }
        }
    }
    Ok(pairs)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

async fn assemble_graph(
    retriever: &dyn Retriever,
    limit: usize,
    include_metadata: bool,
) -> anyhow::Result<(Vec<GraphNode>, Vec<GraphEdge>)> {
    let mut nodes = Vec::new();
    for name in collect_entity_names(retriever).await? {
        if nodes.len() >= limit {
            break;
        }
        // Entities without graph-store details are skipped.
        let Some(data) = retriever.graph().node(&name).await? else {
            continue;
        };

        let mut metadata = BTreeMap::new();
        if include_metadata {
            metadata.insert(
                "source_id".to_string(),
                Value::from(data.source_id.clone().unwrap_or_default()),
            );
            metadata.insert(
                "file_path".to_string(),
                Value::from(data.file_path.clone().unwrap_or_default()),
            );
        }

        nodes.push(GraphNode {
            id: name.clone(),
            label: name,
            node_type: data.entity_type.unwrap_or_else(|| "unknown".to_string()),
            description: if include_metadata { data.description } else { None },
            metadata,
        });
    }

    // Allow more edges than nodes.
    let edge_limit = limit * 2;
    let mut edges = Vec::new();
    for (source, target) in collect_relation_pairs(retriever).await? {
        if edges.len() >= edge_limit {
            break;
        }
        let Some(data) = retriever.graph().edge(&source, &target).await? else {
            continue;
        };

        let description = data.description.unwrap_or_default();
        let label = if description.is_empty() {
            "related_to".to_string()
        } else {
            description.chars().take(50).collect()
        };

        let mut metadata = BTreeMap::new();
        if include_metadata && !description.is_empty() {
            metadata.insert("full_description".to_string(), Value::from(description));
        }

        edges.push(GraphEdge {
            source,
            target,
            label,
            weight: data.weight,
            metadata,
        });
    }

    Ok((nodes, edges))
}

fn graph_stats(node_count: usize, edge_count: usize) -> Value {
    let avg_degree = if node_count > 0 {
        round_to(2.0 * edge_count as f64 / node_count as f64, 2)
    } else {
        0.0
    };
    let graph_density = if node_count > 1 {
        round_to(
            2.0 * edge_count as f64 / (node_count as f64 * (node_count as f64 - 1.0)),
            4,
        )
    } else {
        0.0
    };

    serde_json::json!({
        "total_nodes": node_count,
        "total_edges": edge_count,
        "avg_degree": avg_degree,
        "graph_density": graph_density,
    })
}

#[utoipa::path(
    params(
        ("limit" = Option<usize>, Query, description = "Maximum number of nodes to return (1-1000, default 100)"),
        ("include_metadata" = Option<bool>, Query, description = "Include detailed metadata"),
    ),
    responses((status = 200, description = "Graph data", body = GraphDataResponse)),
    tag = "Graph",
)]
#[get("/api/graph/data")]
pub async fn graph_data(
    web::Query(params): web::Query<GraphDataQuery>,
    rag: Data<Arc<RagService>>,
) -> Result<HttpResponse, ApiError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let include_metadata = params.include_metadata.unwrap_or(false);

    let retriever = rag
        .retriever()
        .await
        .map_err(|e| ApiError::Unavailable(format!("RAG system not initialized: {e}")))?;

    match assemble_graph(retriever.as_ref(), limit, include_metadata).await {
        Ok((nodes, edges)) => {
            info!(nodes = nodes.len(), edges = edges.len(), "retrieved graph data");
            let stats = graph_stats(nodes.len(), edges.len());
            Ok(HttpResponse::Ok().json(GraphDataResponse { nodes, edges, stats }))
        }
        Err(e) => {
            // Readout failures degrade to an empty graph with the error in
            // stats rather than a 500.
            error!(error = %e, "error extracting graph data");
            Ok(HttpResponse::Ok().json(GraphDataResponse {
                nodes: Vec::new(),
                edges: Vec::new(),
                stats: serde_json::json!({
                    "error": e.to_string(),
                    "total_nodes": 0,
                    "total_edges": 0,
                }),
            }))
        }
    }
}

#[utoipa::path(
    responses((status = 200, description = "Graph summary statistics")),
    tag = "Graph",
)]
#[get("/api/graph/stats")]
pub async fn graph_stats_endpoint(rag: Data<Arc<RagService>>) -> Result<HttpResponse, ApiError> {
    let retriever = match rag.retriever().await {
        Ok(retriever) => retriever,
        Err(e) => {
            warn!(error = %e, "graph stats requested before the store was available");
            return Ok(HttpResponse::Ok().json(serde_json::json!({
                "initialized": false,
                "total_entities": 0,
                "total_relations": 0,
            })));
        }
    };

    let (entities, relations) = match (
        collect_entity_names(retriever.as_ref()).await,
        collect_relation_pairs(retriever.as_ref()).await,
    ) {
        (Ok(entities), Ok(relations)) => (entities.len(), relations.len()),
        (entities, relations) => {
            if let Err(e) = entities.and(relations) {
                warn!(error = %e, "error counting graph elements");
            }
            (0, 0)
        }
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "initialized": true,
        "total_entities": entities,
        "total_relations": relations,
        "working_dir": retriever.working_dir().to_string_lossy(),
    })))
}
