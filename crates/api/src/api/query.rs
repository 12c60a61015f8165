//! Query endpoints: plain, multimodal, and conversational retrieval.

use std::sync::Arc;

use actix_web::{HttpResponse, post, web, web::Data};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use mica_inference::ChatMessage;

use crate::errors::ApiError;
use crate::rag::RagService;
use crate::retriever::{MultimodalItem, QueryMode, QueryOptions};

#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MultimodalQueryRequest {
    pub query: String,
    #[serde(default)]
    pub multimodal_content: Option<Vec<MultimodalItem>>,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueryResponse {
    pub query: String,
    pub response: String,
    pub mode: QueryMode,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConversationRequest {
    pub query: String,
    #[serde(default)]
    pub multimodal_content: Option<Vec<MultimodalItem>>,
    #[serde(default)]
    pub history: Option<Vec<ConversationMessage>>,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationResponse {
    pub query: String,
    pub response: String,
    pub mode: QueryMode,
    pub history: Vec<ConversationMessage>,
}

fn validate_query(query: &str) -> Result<(), ApiError> {
    if query.trim().is_empty() {
        return Err(ApiError::Invalid("query must be non-empty".to_string()));
    }
    Ok(())
}

#[utoipa::path(
    request_body = QueryRequest,
    responses((status = 200, description = "Query answer", body = QueryResponse)),
    tag = "Query",
)]
#[post("/api/query/")]
pub async fn query(
    web::Json(req): web::Json<QueryRequest>,
    rag: Data<Arc<RagService>>,
) -> Result<HttpResponse, ApiError> {
    validate_query(&req.query)?;

    let opts = QueryOptions {
        top_k: req.top_k,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        conversation_history: Vec::new(),
    };
    let response = rag.query(&req.query, req.mode, &opts).await?;

    Ok(HttpResponse::Ok().json(QueryResponse {
        query: req.query,
        response,
        mode: req.mode,
        metadata: serde_json::json!({"timestamp": Utc::now().to_rfc3339()}),
    }))
}

#[utoipa::path(
    request_body = MultimodalQueryRequest,
    responses((status = 200, description = "Query answer", body = QueryResponse)),
    tag = "Query",
)]
#[post("/api/query/multimodal")]
pub async fn multimodal_query(
    web::Json(req): web::Json<MultimodalQueryRequest>,
    rag: Data<Arc<RagService>>,
) -> Result<HttpResponse, ApiError> {
    validate_query(&req.query)?;

    let items = req.multimodal_content.unwrap_or_default();
    let item_count = items.len();
    let opts = QueryOptions {
        top_k: req.top_k,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        conversation_history: Vec::new(),
    };
    let response = rag
        .query_with_multimodal(&req.query, items, req.mode, &opts)
        .await?;

    Ok(HttpResponse::Ok().json(QueryResponse {
        query: req.query,
        response,
        mode: req.mode,
        metadata: serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "multimodal_items": item_count,
        }),
    }))
}

#[utoipa::path(
    request_body = ConversationRequest,
    responses((status = 200, description = "Answer with updated history", body = ConversationResponse)),
    tag = "Query",
)]
#[post("/api/query/conversation")]
pub async fn conversation_query(
    web::Json(req): web::Json<ConversationRequest>,
    rag: Data<Arc<RagService>>,
) -> Result<HttpResponse, ApiError> {
    validate_query(&req.query)?;

    let history = req.history.unwrap_or_default();
    let opts = QueryOptions {
        top_k: None,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        conversation_history: history
            .iter()
            .map(|m| ChatMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect(),
    };

    let items = req.multimodal_content.unwrap_or_default();
    let response = if items.is_empty() {
        rag.query(&req.query, req.mode, &opts).await?
    } else {
        rag.query_with_multimodal(&req.query, items, req.mode, &opts)
            .await?
    };

    // Echo the history back with this turn appended.
    let mut updated = history;
    updated.push(ConversationMessage {
        role: "user".to_string(),
        content: req.query.clone(),
        timestamp: Some(Utc::now().to_rfc3339()),
    });
    updated.push(ConversationMessage {
        role: "assistant".to_string(),
        content: response.clone(),
        timestamp: Some(Utc::now().to_rfc3339()),
    });

    Ok(HttpResponse::Ok().json(ConversationResponse {
        query: req.query,
        response,
        mode: req.mode,
        history: updated,
    }))
}
