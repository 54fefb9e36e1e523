//! # Error Handling
//!
//! `AppError` is what HTTP handlers return. Every variant maps to one status
//! code and one machine-readable `type` in the JSON body:
//!
//! ```json
//! {
//!   "error": {
//!     "type": "payload_too_large",
//!     "message": "File too large: exceeds the 15.0 MB limit",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! ## Categories (mirroring the failure taxonomy of the studio):
//! - **Malformed input**: `ValidationError`, `BadRequest`, `PayloadTooLarge`,
//!   `UnsupportedMedia`; rejected before any call to the generative API
//! - **Generation failures**: `Upstream`, the API answered badly or not at all
//! - **Server problems**: `Internal`, `ConfigError`
//!
//! Nothing here is retried. A failed request is terminal and the client
//! decides whether to try again.

use crate::gemini::GeminiError;
use crate::media::UploadError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Unexpected server-side failure
    Internal(String),

    /// Client sent something we could not parse
    BadRequest(String),

    /// Missing or invalid server configuration (e.g. no API key)
    ConfigError(String),

    /// Input parsed but failed a rule (empty prompt, unknown voice)
    ValidationError(String),

    /// Uploaded file exceeds the configured limit
    PayloadTooLarge(String),

    /// Uploaded file is neither an image nor a video
    UnsupportedMedia(String),

    /// The generative API failed or returned no usable payload
    Upstream(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::UnsupportedMedia(msg) => write!(f, "Unsupported media: {}", msg),
            AppError::Upstream(msg) => write!(f, "Generation failed: {}", msg),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg),
            AppError::UnsupportedMedia(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media", msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "generation_failed", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parse failures are the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<GeminiError> for AppError {
    fn from(err: GeminiError) -> Self {
        match err {
            GeminiError::MissingApiKey => AppError::ConfigError(err.to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            UploadError::UnsupportedType(_) => AppError::UnsupportedMedia(err.to_string()),
            UploadError::Missing | UploadError::Read(_) => AppError::ValidationError(err.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::ValidationError("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::PayloadTooLarge("x".into()).status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(AppError::UnsupportedMedia("x".into()).status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(AppError::Upstream("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(AppError::ConfigError("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err: AppError = GeminiError::MissingApiKey.into();
        assert!(matches!(err, AppError::ConfigError(_)));

        let err: AppError = GeminiError::NoPayload("image").into();
        assert!(matches!(err, AppError::Upstream(_)));
    }

    #[test]
    fn test_upload_error_mapping() {
        let err: AppError = UploadError::TooLarge { received: 16, limit: 15 }.into();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));

        let err: AppError = UploadError::UnsupportedType("text/plain".into()).into();
        assert!(matches!(err, AppError::UnsupportedMedia(_)));
    }
}
