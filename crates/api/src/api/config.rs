//! Configuration inspection endpoint. Read-only: credentials never appear
//! in the response.

use std::sync::Arc;

use actix_web::{HttpResponse, get, web::Data};

use mica_core::config::AppConfig;

use crate::errors::ApiError;
use crate::rag::RagService;

#[utoipa::path(
    responses((status = 200, description = "Current configuration summary")),
    tag = "Configuration",
)]
#[get("/api/config/current")]
pub async fn current_config(
    config: Data<AppConfig>,
    rag: Data<Arc<RagService>>,
) -> Result<HttpResponse, ApiError> {
    let status = rag.status();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "backend": {
            "host": config.server.hostname,
            "port": config.server.port,
            "cors_origins": config.server.cors_allowed_origins,
        },
        "models": status.models,
        "storage": {
            "working_dir": config.storage.working_dir.to_string_lossy(),
            "upload_dir": config.storage.upload_dir.to_string_lossy(),
            "catalog_db_path": config.storage.catalog_db_path.to_string_lossy(),
        },
        "indexing": {
            "enabled": config.indexing.enabled,
            "scan_interval_secs": config.indexing.scan_interval.as_secs(),
            "max_files_per_batch": config.indexing.max_files_per_batch,
        },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::test_support::{MockRetriever, service_with, test_config};
    use actix_web::{App, test};
    use tempfile::TempDir;

    #[actix_web::test]
    async fn config_summary_carries_no_credentials() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let rag = service_with(Arc::new(MockRetriever::new(dir.path())), &config);

        let app = test::init_service(
            App::new()
                .app_data(Data::new(config))
                .app_data(Data::new(rag))
                .service(current_config),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/config/current")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["backend"]["host"], "127.0.0.1");
        assert_eq!(body["indexing"]["enabled"], true);
        assert!(body["models"]["llm"]["model"].is_string());
        assert!(!body.to_string().contains("api_key"));
    }
}
