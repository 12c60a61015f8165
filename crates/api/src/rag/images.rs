//! Inline query-image handling: base64 decoding, validation, and
//! persistence under `upload_dir/query_images/`.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::errors::ApiError;

/// Size cap per inline query image.
pub const MAX_QUERY_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Map a data-URL header to a file extension. Unknown image types default
/// to png.
fn extension_from_data_url(header: &str) -> &'static str {
    let header = header.to_lowercase();
    if header.contains("image/jpeg") || header.contains("image/jpg") {
        "jpg"
    } else if header.contains("image/png") {
        "png"
    } else if header.contains("image/webp") {
        "webp"
    } else if header.contains("image/gif") {
        "gif"
    } else if header.contains("image/bmp") {
        "bmp"
    } else if header.contains("image/tiff") || header.contains("image/tif") {
        "tif"
    } else {
        "png"
    }
}

/// Decode an inline image. Accepts raw base64 or a data URL
/// (`data:image/png;base64,...`). Returns the bytes and the inferred
/// extension.
pub fn decode_image_base64(payload: &str) -> Result<(Vec<u8>, &'static str), ApiError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(ApiError::Invalid("img_base64 must be non-empty".to_string()));
    }

    let (body, ext) = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest.split_once(',').ok_or_else(|| {
                ApiError::Invalid("invalid data URL format for img_base64".to_string())
            })?;
            (body, extension_from_data_url(header))
        }
        None => (payload, "png"),
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|_| ApiError::Invalid("invalid base64 payload for img_base64".to_string()))?;

    if bytes.is_empty() {
        return Err(ApiError::Invalid("decoded img_base64 is empty".to_string()));
    }
    if bytes.len() > MAX_QUERY_IMAGE_BYTES {
        return Err(ApiError::Invalid(format!(
            "query image too large: {} bytes > {MAX_QUERY_IMAGE_BYTES} bytes",
            bytes.len()
        )));
    }

    Ok((bytes, ext))
}

/// Persist image bytes as `query_<unix_seconds>_<sha256-prefix>.<ext>` and
/// return the absolute path.
pub async fn persist_query_image(
    bytes: &[u8],
    upload_dir: &Path,
    ext: &str,
) -> Result<PathBuf, ApiError> {
    let query_dir = upload_dir.join("query_images");
    tokio::fs::create_dir_all(&query_dir)
        .await
        .map_err(|e| ApiError::internal(format!("creating query_images directory: {e}")))?;

    let digest = hex::encode(Sha256::digest(bytes));
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let filename = format!("query_{unix}_{}.{ext}", &digest[..16]);
    let path = query_dir.join(filename);

    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ApiError::internal(format!("writing query image: {e}")))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use tempfile::TempDir;

    #[test]
    fn raw_base64_decodes_with_png_default() {
        let payload = base64::engine::general_purpose::STANDARD.encode(b"imagebytes");
        let (bytes, ext) = decode_image_base64(&payload).unwrap();
        assert_eq!(bytes, b"imagebytes");
        assert_eq!(ext, "png");
    }

    #[test]
    fn data_url_header_determines_extension() {
        let payload = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(b"jpegdata")
        );
        let (bytes, ext) = decode_image_base64(&payload).unwrap();
        assert_eq!(bytes, b"jpegdata");
        assert_eq!(ext, "jpg");
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(matches!(
            decode_image_base64("not-valid-base64!!!"),
            Err(ApiError::Invalid(_))
        ));
        assert!(matches!(
            decode_image_base64("data:image/png;base64"),
            Err(ApiError::Invalid(_))
        ));
        assert!(matches!(decode_image_base64(""), Err(ApiError::Invalid(_))));
    }

    #[test]
    fn oversized_image_is_rejected() {
        let blob = vec![0u8; MAX_QUERY_IMAGE_BYTES + 1];
        let payload = base64::engine::general_purpose::STANDARD.encode(&blob);
        assert!(matches!(
            decode_image_base64(&payload),
            Err(ApiError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn persisted_filename_carries_timestamp_and_digest() {
        let dir = TempDir::new().unwrap();
        let path = persist_query_image(b"content", dir.path(), "png")
            .await
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("query_"));
        assert!(name.ends_with(".png"));
        // query_<unix>_<16 hex>.png
        let digest_part = name
            .trim_end_matches(".png")
            .rsplit('_')
            .next()
            .unwrap();
        assert_eq!(digest_part.len(), 16);
        assert_eq!(std::fs::read(&path).unwrap(), b"content");
        assert!(path.starts_with(dir.path().join("query_images")));
    }
}
