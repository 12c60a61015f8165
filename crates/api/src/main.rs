use std::sync::Arc;

use actix_cors::Cors;
use actix_multipart::form::MultipartFormConfig;
use actix_web::{App, HttpServer, http::header, middleware::Compress, web};
use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::sync::watch;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_actix_web::AppExt;
use utoipa_swagger_ui::SwaggerUi;

use mica_core::config::AppConfig;
use mica_core::observability;
use mica_inference::factory;

use mica::api;
use mica::api::IndexerHandle;
use mica::api::files::FileResolver;
use mica::catalog::IndexStatusCatalog;
use mica::indexer::BackgroundIndexer;
use mica::rag::{ProviderSet, RagService};
use mica::retriever::engine::{BasicParser, LocalStoreBuilder};

#[derive(OpenApi)]
#[openapi(info(
    title = "Mica",
    description = "Retrieval-augmented-generation backend: document ingest, querying, and knowledge-base inspection"
))]
struct ApiDoc;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Centralized configuration; fail fast if required config is missing.
    let config = AppConfig::from_env()?;

    observability::init_tracing(&config.observability)?;
    let prometheus = observability::init_metrics(&config.observability.service_name)?;

    tokio::fs::create_dir_all(&config.storage.upload_dir)
        .await
        .context("creating upload directory")?;
    tokio::fs::create_dir_all(&config.storage.working_dir)
        .await
        .context("creating working directory")?;

    let catalog = Arc::new(IndexStatusCatalog::open(&config.storage.catalog_db_path).await?);

    // Providers per configuration; the embedding provider is where the
    // batch scheduler lives for the local backend.
    let providers = ProviderSet {
        llm: factory::create_llm(&config.llm)?,
        embedder: factory::create_embedder(&config.embedding)?,
        vision: config
            .vision
            .as_ref()
            .map(factory::create_vision)
            .transpose()?,
        reranker: config
            .reranker
            .as_ref()
            .map(factory::create_reranker)
            .transpose()?
            .flatten(),
    };

    let builder = LocalStoreBuilder {
        working_dir: config.storage.working_dir.clone(),
        parser: Arc::new(BasicParser),
        llm: Arc::clone(&providers.llm),
        embedder: Arc::clone(&providers.embedder),
    };
    let rag = Arc::new(RagService::new(&config, providers, Box::new(builder)));

    // Background indexer, unless disabled by configuration.
    let (indexer_shutdown, indexer_handle, indexer_task) = if config.indexing.enabled {
        let indexer = Arc::new(BackgroundIndexer::new(
            &config,
            Arc::clone(&rag),
            Arc::clone(&catalog),
        ));
        let (tx, rx) = watch::channel(false);
        let task = Arc::clone(&indexer).spawn(rx);
        (Some(tx), IndexerHandle(Some(indexer)), Some(task))
    } else {
        info!("auto indexing disabled by configuration");
        (None, IndexerHandle(None), None)
    };

    let resolver = web::Data::new(FileResolver::new(
        config.storage.upload_dir.clone(),
        config.storage.working_dir.clone(),
    ));

    let hostname = config.server.hostname.clone();
    let port = config.server.port;
    let cors_origins = config.server.cors_allowed_origins.clone();
    let shutdown_timeout = config.server.shutdown_timeout_secs;

    let config_data = web::Data::new(config);
    let rag_data = web::Data::new(Arc::clone(&rag));
    let catalog_data = web::Data::new(Arc::clone(&catalog));
    let indexer_data = web::Data::new(indexer_handle);

    info!(hostname = %hostname, port, "starting server");

    let server = HttpServer::new(move || {
        let cors = if cors_origins.is_empty() {
            Cors::permissive()
        } else {
            let mut cors = Cors::default()
                .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT])
                .max_age(3600);
            for origin in &cors_origins {
                cors = cors.allowed_origin(origin);
            }
            cors
        };

        App::new()
            .wrap(prometheus.clone())
            .wrap(cors)
            .wrap(Compress::default())
            .app_data(config_data.clone())
            .app_data(rag_data.clone())
            .app_data(catalog_data.clone())
            .app_data(indexer_data.clone())
            .app_data(resolver.clone())
            .app_data(
                MultipartFormConfig::default()
                    .total_limit(512 * 1024 * 1024)
                    .memory_limit(32 * 1024 * 1024),
            )
            .into_utoipa_app()
            .openapi(ApiDoc::openapi())
            .service(api::documents::upload_document)
            .service(api::documents::process_document)
            .service(api::documents::upload_and_process)
            .service(api::documents::list_documents)
            .service(api::documents::document_details)
            .service(api::documents::processed_documents)
            .service(api::documents::index_status)
            .service(api::documents::trigger_index)
            .service(api::documents::delete_document)
            .service(api::query::query)
            .service(api::query::multimodal_query)
            .service(api::query::conversation_query)
            .service(api::graph::graph_data)
            .service(api::graph::graph_stats_endpoint)
            .service(api::config::current_config)
            .service(api::files::get_file)
            .service(api::health::health)
            .service(api::health::readiness)
            .service(api::health::root)
            .openapi_service(|openapi| {
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api/openapi.json", openapi)
            })
            .into_app()
    });

    // actix installs SIGTERM/SIGINT handlers; run() returns once the
    // listener has drained.
    server
        .bind((hostname.as_str(), port))?
        .shutdown_timeout(shutdown_timeout)
        .run()
        .await?;

    info!("shutting down gracefully");

    // Shutdown cascade: indexer first (an in-flight file may complete),
    // then providers, then the catalog.
    if let Some(tx) = indexer_shutdown {
        let _ = tx.send(true);
    }
    if let Some(mut task) = indexer_task {
        let deadline = std::time::Duration::from_secs(shutdown_timeout);
        if tokio::time::timeout(deadline, &mut task).await.is_err() {
            warn!("background indexer did not stop within the shutdown timeout");
            task.abort();
        }
    }

    rag.shutdown().await;
    catalog.close().await;

    info!("server shutdown complete");
    Ok(())
}
