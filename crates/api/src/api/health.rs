//! Health, readiness, and root endpoints.

use std::sync::Arc;

use actix_web::{HttpResponse, get, web::Data};
use serde::Serialize;
use utoipa::ToSchema;

use crate::rag::RagService;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub rag_initialized: bool,
    #[schema(value_type = Object)]
    pub models: serde_json::Value,
}

#[utoipa::path(
    responses((status = 200, description = "Service health", body = HealthResponse)),
    tag = "Health",
)]
#[get("/health")]
pub async fn health(rag: Data<Arc<RagService>>) -> HttpResponse {
    let status = rag.status();
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rag_initialized: status.initialized,
        models: status.models,
    })
}

#[utoipa::path(
    responses((status = 200, description = "Readiness state")),
    tag = "Health",
)]
#[get("/ready")]
pub async fn readiness(rag: Data<Arc<RagService>>) -> HttpResponse {
    let initialized = rag.status().initialized;
    HttpResponse::Ok().json(serde_json::json!({
        "ready": initialized,
        "status": if initialized { "ready" } else { "initializing" },
    }))
}

#[utoipa::path(
    responses((status = 200, description = "Service banner")),
    tag = "Health",
)]
#[get("/")]
pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "name": "mica",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::test_support::{MockRetriever, service_with, test_config};
    use actix_web::{App, test};
    use tempfile::TempDir;

    #[actix_web::test]
    async fn health_and_ready_report_initialization() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let rag = service_with(Arc::new(MockRetriever::new(dir.path())), &config);

        let app = test::init_service(
            App::new()
                .app_data(Data::new(rag.clone()))
                .service(health)
                .service(readiness)
                .service(root),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request())
                .await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["rag_initialized"], false);

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/ready").to_request())
                .await;
        assert_eq!(body["status"], "initializing");

        rag.retriever().await.unwrap();
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/ready").to_request())
                .await;
        assert_eq!(body["ready"], true);

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/").to_request())
                .await;
        assert_eq!(body["status"], "running");
    }
}
