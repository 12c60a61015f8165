//! API error types and their HTTP mapping.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing file or unknown path.
    #[error("{0}")]
    NotFound(String),
    /// Duplicate upload.
    #[error("{0}")]
    Conflict(String),
    /// Bad filename, bad base64, oversized image, malformed request.
    #[error("{0}")]
    Invalid(String),
    /// Filesystem permission denied.
    #[error("{0}")]
    Forbidden(String),
    /// Extension outside the raster-image allow-list.
    #[error("{0}")]
    UnsupportedMedia(String),
    /// Feature disabled by configuration.
    #[error("{0}")]
    Unavailable(String),
    /// Catalog I/O failure.
    #[error("{0}")]
    Integrity(String),
    /// Anything unclassified.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Invalid(_) => "INVALID",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::UnsupportedMedia(_) => "UNSUPPORTED_MEDIA",
            ApiError::Unavailable(_) => "UNAVAILABLE",
            ApiError::Integrity(_) => "INTEGRITY",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    /// Catalog failures map to Integrity without handlers repeating the
    /// conversion everywhere.
    pub fn integrity(e: impl std::fmt::Display) -> Self {
        ApiError::Integrity(e.to_string())
    }

    pub fn internal(e: impl std::fmt::Display) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Integrity(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_documented_status_codes() {
        assert_eq!(
            ApiError::Invalid("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::UnsupportedMedia("x".into()).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            ApiError::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Integrity("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
