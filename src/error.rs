//! # Error Handling
//!
//! This module defines the error type returned by HTTP handlers and how it is
//! converted to an HTTP response.
//!
//! ## Error taxonomy:
//! - **BadRequest**: the caller sent something we cannot work with (missing form
//!   fields, unsupported language, oversized upload) → 400
//! - **Internal**: anything that went wrong on our side (model failure, decoding
//!   failure, I/O) → 500
//!
//! Both render as a flat JSON object with a single `error` key, which is what the
//! upload form's JavaScript reads.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::languages::UnsupportedLanguage;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::BadRequest("No language selected".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid or incomplete form data
    BadRequest(String),

    /// Server-side failure while processing an otherwise valid request
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "{}", msg),
            AppError::Internal(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// { "error": "Unsupported language: Klingon" }
/// { "error": "Server error: failed to decode audio" }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let AppError::Internal(msg) = self {
            tracing::error!(error = %msg, "Request failed with internal error");
        }

        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string()
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// The alternate format (`{:#}`) keeps the whole context chain, so a failure
/// deep inside the decoder still says which step it came from.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// An unknown target language is the caller's fault.
impl From<UnsupportedLanguage> for AppError {
    fn from(err: UnsupportedLanguage) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Broken multipart bodies are client errors, not server errors.
impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid form data: {}", err))
    }
}

/// The blocking thread pool shut down or the inference closure panicked.
impl From<actix_web::error::BlockingError> for AppError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        AppError::Internal(format!("inference task failed: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.error_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_web::test]
    async fn test_bad_request_body_is_message() {
        let (status, body) = body_json(AppError::BadRequest("No file uploaded".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "No file uploaded" }));
    }

    #[actix_web::test]
    async fn test_internal_error_is_prefixed() {
        let (status, body) = body_json(AppError::Internal("model exploded".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Server error: model exploded" }));
    }

    #[actix_web::test]
    async fn test_unsupported_language_maps_to_bad_request() {
        let err: AppError = UnsupportedLanguage("Klingon".to_string()).into();
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Unsupported language: Klingon" }));
    }

    #[test]
    fn test_anyhow_keeps_context_chain() {
        let err = anyhow::anyhow!("unexpected end of stream").context("failed to decode audio");
        let app_err: AppError = err.into();
        assert_eq!(
            app_err.to_string(),
            "Server error: failed to decode audio: unexpected end of stream"
        );
    }
}
