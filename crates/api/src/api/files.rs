//! Image serving: resolves caller-supplied paths against the configured
//! roots and serves raster images only.
//!
//! Parsed markdown references images as `images/<hash>.<ext>`; those are
//! found by searching `working_dir/parsed_output/**/images/`, with a
//! bounded cache in front of the search. Every resolved path must lie under
//! one of the roots.

use std::path::{Path, PathBuf};

use actix_web::{HttpResponse, get, http::header, web, web::Data};
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::ApiError;

/// Strictly common raster formats; no SVG to keep scriptable content out.
const ALLOWED_IMAGE_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];

fn extension_allowed(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Path resolver over the two configured roots.
pub struct FileResolver {
    upload_root: PathBuf,
    working_root: PathBuf,
    /// filename → resolved path, for the parsed_output fallback search.
    search_cache: moka::sync::Cache<String, PathBuf>,
}

impl FileResolver {
    pub fn new(upload_root: PathBuf, working_root: PathBuf) -> Self {
        Self {
            upload_root,
            working_root,
            search_cache: moka::sync::Cache::new(4096),
        }
    }

    fn canonical_roots(&self) -> (PathBuf, PathBuf) {
        (
            self.upload_root
                .canonicalize()
                .unwrap_or_else(|_| self.upload_root.clone()),
            self.working_root
                .canonicalize()
                .unwrap_or_else(|_| self.working_root.clone()),
        )
    }

    fn normalize(raw: &str) -> Result<String, ApiError> {
        let mut value = raw.trim().to_string();
        if value.is_empty() {
            return Err(ApiError::Invalid("path is required".to_string()));
        }
        if value.contains('\0') {
            return Err(ApiError::Invalid("invalid path".to_string()));
        }

        // Strip quoting the caller may have copied verbatim.
        if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
            || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
        {
            value = value[1..value.len() - 1].trim().to_string();
        }

        if value.to_lowercase().starts_with("file://") {
            value = value[7..].to_string();
        }

        Ok(value)
    }

    /// Resolve a requested path to a file under one of the roots, or None.
    pub fn resolve(&self, requested: &str) -> Result<Option<PathBuf>, ApiError> {
        let mut normalized = Self::normalize(requested)?;
        let (upload_root, working_root) = self.canonical_roots();

        // Web-style absolute paths whose first segment names a root are
        // root-relative, not filesystem-absolute.
        if normalized.starts_with('/') {
            let first_segment = normalized
                .trim_start_matches('/')
                .split('/')
                .next()
                .unwrap_or_default()
                .to_string();
            let root_names = [
                upload_root.file_name().map(|n| n.to_string_lossy().into_owned()),
                working_root.file_name().map(|n| n.to_string_lossy().into_owned()),
                Some("images".to_string()),
            ];
            if root_names
                .iter()
                .flatten()
                .any(|name| *name == first_segment)
            {
                normalized = normalized.trim_start_matches('/').to_string();
            }
        }

        let candidate = PathBuf::from(&normalized);

        // Relative paths probe the working dir first, then uploads.
        if !candidate.is_absolute() {
            for root in [&working_root, &upload_root] {
                if let Ok(resolved) = root.join(&candidate).canonicalize() {
                    if resolved.is_file() && under_roots(&resolved, &upload_root, &working_root) {
                        return Ok(Some(resolved));
                    }
                }
            }
        }

        // As-is: an absolute path that already includes one of the roots.
        if let Ok(resolved) = candidate.canonicalize() {
            if resolved.is_file() && under_roots(&resolved, &upload_root, &working_root) {
                return Ok(Some(resolved));
            }
        }

        // Bare `images/<name>.<ext>`: search the parsed-output tree.
        if extension_allowed(&candidate) {
            if let Some(name) = candidate.file_name().map(|n| n.to_string_lossy().into_owned()) {
                if let Some(found) = self.find_parsed_image(&name, &working_root) {
                    return Ok(Some(found));
                }
            }
        }

        Ok(None)
    }

    /// Search `parsed_output/**/images/<name>`. Filenames are content
    /// hashes, so collisions are not expected; when multiple matches exist
    /// the lexicographically smallest wins.
    fn find_parsed_image(&self, name: &str, working_root: &Path) -> Option<PathBuf> {
        if let Some(cached) = self.search_cache.get(name) {
            if cached.is_file() {
                return Some(cached);
            }
            self.search_cache.invalidate(name);
        }

        let search_root = working_root.join("parsed_output");
        if !search_root.exists() {
            return None;
        }

        let mut best: Option<PathBuf> = None;
        let mut matches = 0usize;
        for entry in WalkDir::new(&search_root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy() != name {
                continue;
            }
            // Only the conventional images directories, to avoid acting as
            // a general file oracle.
            if !entry.path().components().any(|c| c.as_os_str() == "images") {
                continue;
            }
            if !extension_allowed(entry.path()) {
                continue;
            }
            let Ok(resolved) = entry.path().canonicalize() else {
                continue;
            };
            if !resolved.starts_with(working_root) {
                continue;
            }

            matches += 1;
            match &best {
                Some(current) if resolved >= *current => {}
                _ => best = Some(resolved),
            }
        }

        if matches > 1 {
            debug!(name, matches, "multiple parsed image matches; using smallest");
        }
        if let Some(found) = &best {
            self.search_cache.insert(name.to_string(), found.clone());
        }
        best
    }
}

fn under_roots(path: &Path, upload_root: &Path, working_root: &Path) -> bool {
    path.starts_with(upload_root) || path.starts_with(working_root)
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub path: String,
}

#[utoipa::path(
    params(("path" = String, Query, description = "Image path (absolute or relative)")),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 404, description = "Not found under any root"),
        (status = 415, description = "Not an allowed image type"),
    ),
    tag = "Files",
)]
#[get("/api/files")]
pub async fn get_file(
    web::Query(params): web::Query<FileQuery>,
    resolver: Data<FileResolver>,
) -> Result<HttpResponse, ApiError> {
    let resolved = {
        let resolver = resolver.clone();
        let requested = params.path.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(&requested))
            .await
            .map_err(|e| ApiError::internal(format!("path resolution failed: {e}")))??
    };

    let Some(resolved) = resolved else {
        return Err(ApiError::NotFound("file not found".to_string()));
    };

    if !extension_allowed(&resolved) {
        return Err(ApiError::UnsupportedMedia(format!(
            "unsupported file type: {}",
            resolved
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default()
        )));
    }

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|e| ApiError::internal(format!("reading image: {e}")))?;

    let mime = mime_guess::from_path(&resolved).first_or_octet_stream();

    // Parsed images are content-addressed and query images timestamped, so
    // aggressive caching is safe.
    Ok(HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "public, max-age=3600"))
        .content_type(mime.as_ref())
        .body(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn resolver(dir: &TempDir) -> FileResolver {
        let upload = dir.path().join("uploads");
        let working = dir.path().join("rag_storage");
        fs::create_dir_all(&upload).unwrap();
        fs::create_dir_all(&working).unwrap();
        FileResolver::new(upload, working)
    }

    #[test]
    fn relative_path_probes_working_then_uploads() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);
        fs::write(dir.path().join("uploads/pic.png"), b"img").unwrap();

        let resolved = r.resolve("pic.png").unwrap().unwrap();
        assert!(resolved.ends_with("uploads/pic.png"));
    }

    #[test]
    fn root_named_web_path_is_treated_as_relative() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);
        fs::write(dir.path().join("uploads/pic.png"), b"img").unwrap();

        let resolved = r.resolve("/uploads/pic.png").unwrap().unwrap();
        assert!(resolved.ends_with("uploads/pic.png"));
    }

    #[test]
    fn escape_outside_roots_is_not_found() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);
        fs::write(dir.path().join("secret.png"), b"img").unwrap();

        assert!(r.resolve("../secret.png").unwrap().is_none());
        let absolute = dir.path().join("secret.png");
        assert!(r.resolve(&absolute.to_string_lossy()).unwrap().is_none());
    }

    #[test]
    fn bare_image_name_found_under_parsed_output() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);
        let images = dir.path().join("rag_storage/parsed_output/doc1/images");
        fs::create_dir_all(&images).unwrap();
        fs::write(images.join("abc123.png"), b"img").unwrap();

        let resolved = r.resolve("images/abc123.png").unwrap().unwrap();
        assert!(resolved.ends_with("doc1/images/abc123.png"));

        // Served again from the cache.
        let again = r.resolve("images/abc123.png").unwrap().unwrap();
        assert_eq!(resolved, again);
    }

    #[test]
    fn multiple_matches_pick_lexicographically_smallest() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);
        for doc in ["doc-b", "doc-a"] {
            let images = dir
                .path()
                .join(format!("rag_storage/parsed_output/{doc}/images"));
            fs::create_dir_all(&images).unwrap();
            fs::write(images.join("same.png"), b"img").unwrap();
        }

        let resolved = r.resolve("images/same.png").unwrap().unwrap();
        assert!(resolved.to_string_lossy().contains("doc-a"));
    }

    #[test]
    fn images_outside_images_directories_are_not_searched() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);
        let stray = dir.path().join("rag_storage/parsed_output/doc1");
        fs::create_dir_all(&stray).unwrap();
        fs::write(stray.join("stray.png"), b"img").unwrap();

        assert!(r.resolve("images/stray.png").unwrap().is_none());
    }

    #[test]
    fn empty_and_nul_paths_are_invalid() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);

        assert!(matches!(r.resolve("  "), Err(ApiError::Invalid(_))));
        assert!(matches!(r.resolve("a\0b"), Err(ApiError::Invalid(_))));
    }

    #[test]
    fn quotes_and_file_scheme_are_stripped() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);
        fs::write(dir.path().join("uploads/pic.jpg"), b"img").unwrap();

        assert!(r.resolve("\"pic.jpg\"").unwrap().is_some());
        let uri = format!("file://{}", dir.path().join("uploads/pic.jpg").display());
        assert!(r.resolve(&uri).unwrap().is_some());
    }

    #[actix_web::test]
    async fn handler_refuses_non_image_extensions() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);
        fs::write(dir.path().join("uploads/page.svg"), b"<svg/>").unwrap();

        let app = actix_web::test::init_service(
            actix_web::App::new()
                .app_data(Data::new(r))
                .service(get_file),
        )
        .await;

        let req = actix_web::test::TestRequest::get()
            .uri("/api/files?path=page.svg")
            .to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert_eq!(resp.status(), 415);
    }

    #[actix_web::test]
    async fn handler_serves_image_with_cache_header() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir);
        fs::write(dir.path().join("uploads/pic.png"), b"imagebytes").unwrap();

        let app = actix_web::test::init_service(
            actix_web::App::new()
                .app_data(Data::new(r))
                .service(get_file),
        )
        .await;

        let req = actix_web::test::TestRequest::get()
            .uri("/api/files?path=pic.png")
            .to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=3600"
        );
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
    }
}
