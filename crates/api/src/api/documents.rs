//! Document management endpoints: upload, processing, listing, index
//! status, manual trigger, and soft-delete.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use actix_multipart::form::{MultipartForm, tempfile::TempFile, text::Text};
use actix_web::{HttpResponse, delete, get, post, web, web::Data};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use walkdir::WalkDir;

use mica_core::config::AppConfig;

use crate::api::IndexerHandle;
use crate::catalog::{IndexStatus, IndexStatusCatalog};
use crate::errors::ApiError;
use crate::rag::{ProcessOutcome, RagService};
use crate::retriever::ParseMethod;
use crate::scanner::{FileMetadata, compute_file_hash};

#[derive(Debug, MultipartForm)]
pub struct UploadForm {
    #[multipart(rename = "file")]
    pub file: TempFile,
}

#[derive(Debug, MultipartForm)]
pub struct UploadAndProcessForm {
    #[multipart(rename = "file")]
    pub file: TempFile,
    pub parse_method: Option<Text<String>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentUploadResponse {
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DocumentProcessRequest {
    pub file_path: String,
    #[serde(default)]
    pub parse_method: ParseMethod,
    #[serde(default)]
    pub output_dir: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentListResponse {
    pub documents: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentDetailItem {
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub upload_date: DateTime<Utc>,
    pub status: String,
    pub storage_location: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentDetailsResponse {
    pub documents: Vec<DocumentDetailItem>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentDeleteResponse {
    pub status: String,
    pub message: String,
    pub trash_location: String,
    pub original_path: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerIndexResponse {
    pub files_scanned: usize,
    pub files_pending: usize,
    pub files_processing: usize,
    pub message: String,
}

fn sanitize_upload_filename(name: Option<&str>) -> Result<String, ApiError> {
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::Invalid("upload is missing a filename".to_string()))?;

    if name.contains('/') || name.contains('\\') {
        return Err(ApiError::Invalid(
            "invalid filename: must not contain path separators".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Build the defensive catalog record for a file that just landed on disk.
async fn record_for(upload_dir: &Path, relative: &str) -> anyhow::Result<FileMetadata> {
    let absolute = upload_dir.join(relative);
    let stat = tokio::fs::metadata(&absolute).await?;
    let hash = {
        let absolute = absolute.clone();
        tokio::task::spawn_blocking(move || compute_file_hash(&absolute)).await??
    };

    Ok(FileMetadata {
        path: relative.to_string(),
        hash,
        size: stat.len() as i64,
        last_modified: stat.modified().map(DateTime::<Utc>::from)?,
        name: relative.to_string(),
    })
}

#[utoipa::path(
    responses(
        (status = 200, description = "Uploaded", body = DocumentUploadResponse),
        (status = 409, description = "File already exists"),
    ),
    tag = "Documents",
)]
#[post("/api/documents/upload")]
pub async fn upload_document(
    MultipartForm(form): MultipartForm<UploadForm>,
    config: Data<AppConfig>,
    catalog: Data<Arc<IndexStatusCatalog>>,
) -> Result<HttpResponse, ApiError> {
    let filename = sanitize_upload_filename(form.file.file_name.as_deref())?;
    let upload_dir = &config.storage.upload_dir;

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| ApiError::internal(format!("creating upload directory: {e}")))?;

    let destination = upload_dir.join(&filename);
    if destination.exists() {
        return Err(ApiError::Conflict(format!(
            "File '{filename}' already exists"
        )));
    }

    tokio::fs::copy(form.file.file.path(), &destination)
        .await
        .map_err(|e| ApiError::internal(format!("saving uploaded file: {e}")))?;

    let file_size = tokio::fs::metadata(&destination)
        .await
        .map(|m| m.len() as i64)
        .unwrap_or(form.file.size as i64);

    info!(filename = %filename, size = file_size, "uploaded file");

    // Track the upload for background indexing; a catalog failure must not
    // fail the upload itself.
    match record_for(upload_dir, &filename).await {
        Ok(meta) => {
            if let Err(e) = catalog.upsert(&IndexStatus::pending(&meta)).await {
                warn!(filename = %filename, error = %e, "failed to create pending catalog record");
            }
        }
        Err(e) => {
            warn!(filename = %filename, error = %e, "failed to stat uploaded file for catalog");
        }
    }

    Ok(HttpResponse::Ok().json(DocumentUploadResponse {
        filename,
        file_path: destination.to_string_lossy().into_owned(),
        file_size,
        content_type: form.file.content_type.map(|m| m.to_string()),
    }))
}

/// Catalog bookkeeping after a successful process call: upsert INDEXED,
/// preserving an existing record's hash and size. Failures are logged only.
async fn record_indexed(catalog: &IndexStatusCatalog, upload_dir: &Path, file_path: &Path) {
    let relative = file_path
        .strip_prefix(upload_dir)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| file_path.to_string_lossy().into_owned());

    let result = async {
        let status = match catalog.get(&relative).await? {
            Some(existing) => existing.indexed(),
            None => IndexStatus::pending(&record_for(upload_dir, &relative).await?).indexed(),
        };
        catalog.upsert(&status).await
    }
    .await;

    if let Err(e) = result {
        warn!(path = %relative, error = %e, "failed to record indexed status");
    }
}

#[utoipa::path(
    request_body = DocumentProcessRequest,
    responses(
        (status = 200, description = "Processing outcome", body = ProcessOutcome),
        (status = 404, description = "File not found"),
    ),
    tag = "Documents",
)]
#[post("/api/documents/process")]
pub async fn process_document(
    web::Json(req): web::Json<DocumentProcessRequest>,
    config: Data<AppConfig>,
    rag: Data<Arc<RagService>>,
    catalog: Data<Arc<IndexStatusCatalog>>,
) -> Result<HttpResponse, ApiError> {
    let requested = PathBuf::from(&req.file_path);
    let file_path = if requested.is_absolute() {
        requested
    } else {
        config.storage.upload_dir.join(&requested)
    };

    if !file_path.exists() {
        return Err(ApiError::NotFound(format!(
            "File not found: {}",
            req.file_path
        )));
    }

    let output_dir = req.output_dir.as_ref().map(PathBuf::from);
    let outcome = rag
        .process_document(&file_path, output_dir.as_deref(), req.parse_method)
        .await;

    if outcome.is_success() {
        record_indexed(&catalog, &config.storage.upload_dir, &file_path).await;
    }

    Ok(HttpResponse::Ok().json(outcome))
}

#[utoipa::path(
    responses((status = 200, description = "Processing outcome", body = ProcessOutcome)),
    tag = "Documents",
)]
#[post("/api/documents/upload-and-process")]
pub async fn upload_and_process(
    MultipartForm(form): MultipartForm<UploadAndProcessForm>,
    config: Data<AppConfig>,
    rag: Data<Arc<RagService>>,
    catalog: Data<Arc<IndexStatusCatalog>>,
) -> Result<HttpResponse, ApiError> {
    let filename = sanitize_upload_filename(form.file.file_name.as_deref())?;
    let upload_dir = &config.storage.upload_dir;

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| ApiError::internal(format!("creating upload directory: {e}")))?;

    let destination = upload_dir.join(&filename);
    tokio::fs::copy(form.file.file.path(), &destination)
        .await
        .map_err(|e| ApiError::internal(format!("saving uploaded file: {e}")))?;

    let parse_method = match form
        .parse_method
        .as_ref()
        .map(|m| m.to_lowercase())
        .as_deref()
    {
        Some("ocr") => ParseMethod::Ocr,
        Some("txt") => ParseMethod::Txt,
        _ => ParseMethod::Auto,
    };

    info!(filename = %filename, "uploaded and processing file");
    let outcome = rag.process_document(&destination, None, parse_method).await;

    if outcome.is_success() {
        record_indexed(&catalog, upload_dir, &destination).await;
    }

    Ok(HttpResponse::Ok().json(outcome))
}

#[utoipa::path(
    responses((status = 200, description = "OK", body = DocumentListResponse)),
    tag = "Documents",
)]
#[get("/api/documents/list")]
pub async fn list_documents(config: Data<AppConfig>) -> Result<HttpResponse, ApiError> {
    let upload_dir = config.storage.upload_dir.clone();
    let documents = tokio::task::spawn_blocking(move || {
        if !upload_dir.exists() {
            return Vec::new();
        }
        WalkDir::new(&upload_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&upload_dir)
                    .ok()
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| ApiError::internal(format!("listing documents: {e}")))?;

    Ok(HttpResponse::Ok().json(DocumentListResponse {
        total: documents.len(),
        documents,
    }))
}

#[utoipa::path(
    responses((status = 200, description = "OK", body = DocumentDetailsResponse)),
    tag = "Documents",
)]
#[get("/api/documents/details")]
pub async fn document_details(
    config: Data<AppConfig>,
    rag: Data<Arc<RagService>>,
) -> Result<HttpResponse, ApiError> {
    let upload_dir = config.storage.upload_dir.clone();
    if !upload_dir.exists() {
        return Ok(HttpResponse::Ok().json(DocumentDetailsResponse {
            documents: Vec::new(),
            total: 0,
        }));
    }

    // Filenames the retrieval store reports as fully processed.
    let retriever = rag.retriever().await?;
    let mut processed_names = std::collections::HashSet::new();
    match retriever.doc_status().list().await {
        Ok(statuses) => {
            for doc in statuses.values() {
                if doc.get("status").and_then(|s| s.as_str()) == Some("PROCESSED") {
                    if let Some(file_path) = doc.get("file_path").and_then(|p| p.as_str()) {
                        if let Some(name) = Path::new(file_path).file_name() {
                            processed_names.insert(name.to_string_lossy().into_owned());
                        }
                    }
                }
            }
        }
        Err(e) => warn!(error = %e, "error reading processed documents"),
    }

    let details = tokio::task::spawn_blocking(move || {
        let mut details = Vec::new();
        for entry in WalkDir::new(&upload_dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&upload_dir) else {
                continue;
            };
            if relative.components().any(|c| c.as_os_str() == ".trash") {
                continue;
            }

            let Ok(stat) = entry.metadata() else {
                warn!(path = %entry.path().display(), "failed to stat file for details");
                continue;
            };
            let relative = relative.to_string_lossy().into_owned();
            let status = if processed_names.contains(&name) {
                "indexed"
            } else {
                "uploaded"
            };

            details.push(DocumentDetailItem {
                filename: name,
                file_path: relative.clone(),
                file_size: stat.len() as i64,
                upload_date: stat
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
                status: status.to_string(),
                storage_location: relative,
            });
        }
        details
    })
    .await
    .map_err(|e| ApiError::internal(format!("collecting document details: {e}")))?;

    Ok(HttpResponse::Ok().json(DocumentDetailsResponse {
        total: details.len(),
        documents: details,
    }))
}

#[utoipa::path(
    responses((status = 200, description = "Retriever-processed documents")),
    tag = "Documents",
)]
#[get("/api/documents/processed")]
pub async fn processed_documents(rag: Data<Arc<RagService>>) -> Result<HttpResponse, ApiError> {
    let retriever = rag.retriever().await?;

    let mut documents = Vec::new();
    match retriever.doc_status().list().await {
        Ok(statuses) => {
            for (doc_id, doc) in statuses {
                documents.push(serde_json::json!({
                    "doc_id": doc_id,
                    "file_path": doc.get("file_path").and_then(|v| v.as_str()).unwrap_or(""),
                    "status": doc.get("status").and_then(|v| v.as_str()).unwrap_or("unknown"),
                    "chunks": doc.get("chunks").and_then(|v| v.as_u64()).unwrap_or(0),
                    "processed_at": doc.get("processed_at").and_then(|v| v.as_str()).unwrap_or(""),
                }));
            }
        }
        Err(e) => warn!(error = %e, "error reading processed documents"),
    }

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "total": documents.len(),
        "documents": documents,
        "working_dir": retriever.working_dir().to_string_lossy(),
    })))
}

#[utoipa::path(
    responses((status = 200, description = "Full catalog", body = Vec<IndexStatus>)),
    tag = "Documents",
)]
#[get("/api/documents/index-status")]
pub async fn index_status(
    catalog: Data<Arc<IndexStatusCatalog>>,
) -> Result<HttpResponse, ApiError> {
    let statuses = catalog.list().await.map_err(ApiError::integrity)?;
    Ok(HttpResponse::Ok().json(statuses))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Scan summary", body = TriggerIndexResponse),
        (status = 503, description = "Indexing disabled"),
    ),
    tag = "Documents",
)]
#[post("/api/documents/trigger-index")]
pub async fn trigger_index(indexer: Data<IndexerHandle>) -> Result<HttpResponse, ApiError> {
    let Some(indexer) = indexer.0.as_ref() else {
        return Err(ApiError::Unavailable(
            "Background indexer is not enabled. Set AUTO_INDEXING_ENABLED=true in configuration."
                .to_string(),
        ));
    };

    let summary = indexer
        .trigger_index()
        .await
        .map_err(ApiError::integrity)?;

    let mut message = format!(
        "Scan complete. Found {} files total, {} pending processing.",
        summary.files_scanned, summary.files_pending
    );
    if summary.files_processing > 0 {
        message.push_str(&format!(
            " {} files currently processing.",
            summary.files_processing
        ));
    }

    Ok(HttpResponse::Ok().json(TriggerIndexResponse {
        files_scanned: summary.files_scanned,
        files_pending: summary.files_pending,
        files_processing: summary.files_processing,
        message,
    }))
}

#[utoipa::path(
    params(("filename" = String, Path, description = "Name of the file to soft-delete")),
    responses(
        (status = 200, description = "Moved to trash", body = DocumentDeleteResponse),
        (status = 400, description = "Invalid filename"),
        (status = 404, description = "File not found"),
    ),
    tag = "Documents",
)]
#[delete("/api/documents/delete/{filename}")]
pub async fn delete_document(
    filename: web::Path<String>,
    config: Data<AppConfig>,
    catalog: Data<Arc<IndexStatusCatalog>>,
) -> Result<HttpResponse, ApiError> {
    let filename = filename.into_inner();

    // Directory-traversal guard: the name must be a bare file name.
    let is_bare_name = !filename.is_empty()
        && !filename.contains('/')
        && !filename.contains('\\')
        && Path::new(&filename)
            .file_name()
            .is_some_and(|n| n == filename.as_str());
    if !is_bare_name {
        return Err(ApiError::Invalid(
            "Invalid filename: must not contain path separators".to_string(),
        ));
    }
    if filename.starts_with('.') {
        return Err(ApiError::Invalid(
            "Invalid filename: hidden files cannot be deleted via API".to_string(),
        ));
    }

    let upload_dir = &config.storage.upload_dir;
    let original = upload_dir.join(&filename);

    let stat = match tokio::fs::metadata(&original).await {
        Ok(stat) => stat,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("File not found: {filename}")));
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ApiError::Forbidden(format!(
                "Permission denied: cannot delete file '{filename}'"
            )));
        }
        Err(e) => return Err(ApiError::internal(e)),
    };
    if !stat.is_file() {
        return Err(ApiError::Invalid(format!("Not a file: {filename}")));
    }

    let trash_dir = upload_dir.join(".trash");
    tokio::fs::create_dir_all(&trash_dir)
        .await
        .map_err(|e| ApiError::internal(format!("creating trash directory: {e}")))?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let trash_name = format!("{timestamp}_{filename}");
    let trash_path = trash_dir.join(&trash_name);

    match tokio::fs::rename(&original, &trash_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ApiError::Forbidden(format!(
                "Permission denied: cannot delete file '{filename}'"
            )));
        }
        Err(e) => return Err(ApiError::internal(format!("moving file to trash: {e}"))),
    }

    info!(filename = %filename, trash = %trash_name, "moved file to trash");

    // Drop the catalog record so the file cannot resurface as indexed; a
    // failure here must not fail the delete.
    if let Err(e) = catalog.delete(&filename).await {
        warn!(filename = %filename, error = %e, "failed to remove catalog record");
    }

    Ok(HttpResponse::Ok().json(DocumentDeleteResponse {
        status: "success".to_string(),
        message: format!("File '{filename}' moved to trash successfully"),
        trash_location: format!(".trash/{trash_name}"),
        original_path: filename,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::test_support::{MockRetriever, service_with, test_config};
    use actix_web::{App, test};
    use std::fs;
    use tempfile::TempDir;

    async fn app_data(
        dir: &TempDir,
    ) -> (
        Data<AppConfig>,
        Data<Arc<RagService>>,
        Data<Arc<IndexStatusCatalog>>,
        Data<IndexerHandle>,
    ) {
        let config = test_config(dir.path());
        fs::create_dir_all(&config.storage.upload_dir).unwrap();
        let catalog = Arc::new(
            IndexStatusCatalog::open(&config.storage.catalog_db_path)
                .await
                .unwrap(),
        );
        let rag = service_with(Arc::new(MockRetriever::new(dir.path())), &config);
        let indexer = Arc::new(crate::indexer::BackgroundIndexer::new(
            &config,
            rag.clone(),
            catalog.clone(),
        ));
        (
            Data::new(config),
            Data::new(rag),
            Data::new(catalog),
            Data::new(IndexerHandle(Some(indexer))),
        )
    }

    fn multipart_body(filename: &str, content: &str) -> (String, Vec<u8>) {
        let boundary = "------------------------testboundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             {content}\r\n\
             --{boundary}--\r\n"
        );
        (
            format!("multipart/form-data; boundary={boundary}"),
            body.into_bytes(),
        )
    }

    #[actix_web::test]
    async fn upload_saves_file_and_creates_pending_record() {
        let dir = TempDir::new().unwrap();
        let (config, rag, catalog, indexer) = app_data(&dir).await;
        let upload_dir = config.storage.upload_dir.clone();
        let catalog_ref = catalog.clone();

        let app = test::init_service(
            App::new()
                .app_data(config)
                .app_data(rag)
                .app_data(catalog)
                .app_data(indexer)
                .service(upload_document),
        )
        .await;

        let (content_type, body) = multipart_body("report.txt", "hello");
        let req = test::TestRequest::post()
            .uri("/api/documents/upload")
            .insert_header(("content-type", content_type.clone()))
            .set_payload(body.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        let parsed: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(parsed["filename"], "report.txt");
        assert_eq!(parsed["file_size"], 5);
        assert!(upload_dir.join("report.txt").exists());

        // Upload creates the PENDING catalog record.
        let status = catalog_ref.get("report.txt").await.unwrap().unwrap();
        assert_eq!(status.status, crate::catalog::IndexState::Pending);

        // A second upload of the same name conflicts.
        let req = test::TestRequest::post()
            .uri("/api/documents/upload")
            .insert_header(("content-type", content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 409);
    }

    #[actix_web::test]
    async fn delete_rejects_traversal_names() {
        let dir = TempDir::new().unwrap();
        let (config, rag, catalog, indexer) = app_data(&dir).await;
        let app = test::init_service(
            App::new()
                .app_data(config)
                .app_data(rag)
                .app_data(catalog)
                .app_data(indexer)
                .service(delete_document),
        )
        .await;

        let req = test::TestRequest::delete()
            .uri("/api/documents/delete/..%2Fsecret")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let req = test::TestRequest::delete()
            .uri("/api/documents/delete/.hidden")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn delete_moves_file_to_trash() {
        let dir = TempDir::new().unwrap();
        let (config, rag, catalog, indexer) = app_data(&dir).await;
        let upload_dir = config.storage.upload_dir.clone();
        let catalog_ref = catalog.clone();
        fs::write(upload_dir.join("foo.pdf"), b"pdfbytes").unwrap();

        let meta = crate::scanner::FileMetadata {
            path: "foo.pdf".to_string(),
            hash: "h1".to_string(),
            size: 8,
            last_modified: chrono::Utc::now(),
            name: "foo.pdf".to_string(),
        };
        catalog_ref
            .upsert(&IndexStatus::pending(&meta))
            .await
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(config)
                .app_data(rag)
                .app_data(catalog)
                .app_data(indexer)
                .service(delete_document),
        )
        .await;

        let req = test::TestRequest::delete()
            .uri("/api/documents/delete/foo.pdf")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "success");
        let trash_location = body["trash_location"].as_str().unwrap();
        assert!(trash_location.starts_with(".trash/"));
        assert!(trash_location.ends_with("_foo.pdf"));

        assert!(!upload_dir.join("foo.pdf").exists());
        assert!(upload_dir.join(trash_location).exists());

        // The catalog record goes with the file.
        assert!(catalog_ref.get("foo.pdf").await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn delete_missing_file_is_404() {
        let dir = TempDir::new().unwrap();
        let (config, rag, catalog, indexer) = app_data(&dir).await;
        let app = test::init_service(
            App::new()
                .app_data(config)
                .app_data(rag)
                .app_data(catalog)
                .app_data(indexer)
                .service(delete_document),
        )
        .await;

        let req = test::TestRequest::delete()
            .uri("/api/documents/delete/absent.pdf")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn soft_deleted_file_never_resurfaces_in_details() {
        let dir = TempDir::new().unwrap();
        let (config, rag, catalog, indexer) = app_data(&dir).await;
        let upload_dir = config.storage.upload_dir.clone();
        fs::write(upload_dir.join("keep.pdf"), b"keep").unwrap();
        fs::create_dir_all(upload_dir.join(".trash")).unwrap();
        fs::write(upload_dir.join(".trash/123_gone.pdf"), b"gone").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(config)
                .app_data(rag)
                .app_data(catalog)
                .app_data(indexer)
                .service(document_details),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/documents/details")
            .to_request();
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["total"], 1);
        assert_eq!(body["documents"][0]["filename"], "keep.pdf");
        assert_eq!(body["documents"][0]["status"], "uploaded");
    }

    #[actix_web::test]
    async fn trigger_index_reports_counts() {
        let dir = TempDir::new().unwrap();
        let (config, rag, catalog, indexer) = app_data(&dir).await;
        fs::write(config.storage.upload_dir.join("a.txt"), b"x").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(config)
                .app_data(rag)
                .app_data(catalog)
                .app_data(indexer)
                .service(trigger_index),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/documents/trigger-index")
            .to_request();
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["files_scanned"], 1);
        assert_eq!(body["files_pending"], 1);
        assert!(body["message"].as_str().unwrap().contains("Scan complete"));
    }

    #[actix_web::test]
    async fn trigger_index_disabled_is_503() {
        let dir = TempDir::new().unwrap();
        let (config, rag, catalog, _) = app_data(&dir).await;
        let app = test::init_service(
            App::new()
                .app_data(config)
                .app_data(rag)
                .app_data(catalog)
                .app_data(Data::new(IndexerHandle(None)))
                .service(trigger_index),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/documents/trigger-index")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 503);
    }

    #[actix_web::test]
    async fn list_returns_relative_paths() {
        let dir = TempDir::new().unwrap();
        let (config, rag, catalog, indexer) = app_data(&dir).await;
        let upload_dir = config.storage.upload_dir.clone();
        fs::write(upload_dir.join("top.txt"), b"x").unwrap();
        fs::create_dir_all(upload_dir.join("nested")).unwrap();
        fs::write(upload_dir.join("nested/deep.txt"), b"y").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(config)
                .app_data(rag)
                .app_data(catalog)
                .app_data(indexer)
                .service(list_documents),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/documents/list")
            .to_request();
        let body: serde_json::Value =
            test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["total"], 2);
        let docs: Vec<&str> = body["documents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d.as_str().unwrap())
            .collect();
        assert!(docs.contains(&"top.txt"));
        assert!(docs.contains(&"nested/deep.txt"));
    }
}
