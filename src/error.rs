//! # Error Handling
//!
//! This module defines the error types the gateway can produce and how each one
//! becomes an HTTP response. Handlers never build error responses by hand: they
//! return `Err(AppError::...)` and actix calls `ResponseError::error_response`.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **T**: The success type (e.g. a transcription response)
//! - **E**: The error type (`AppError`)
//! - **No exceptions**: each failure kind is a value the caller must handle
//!
//! ### Enums for Error Types
//! - Each variant is one failure category with its own status code
//! - The `String` payload is the human-readable `detail` sent to the client
//!
//! ## Wire Format:
//! Clients of the OpenAI-style transcription API read the `detail` field, so
//! every error body looks like:
//! ```json
//! { "detail": "Model not found: large", "type": "bad_request" }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Unauthorized**: Missing or wrong bearer credential (401)
/// - **BadRequest**: Unknown model, malformed multipart body, bad form values (400)
/// - **PayloadTooLarge**: Uploaded audio exceeds the configured limit (413)
/// - **Internal**: Staging I/O or engine failures (500)
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::BadRequest("Missing file".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// The caller did not present the expected `Authorization: Bearer <key>` header
    Unauthorized(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Upload exceeded `transcription.max_upload_bytes`
    PayloadTooLarge(String),

    /// Internal server errors (temp file I/O, engine failures, worker panics)
    Internal(String),
}

impl AppError {
    /// Machine-readable error code included next to `detail`.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => "invalid_api_key",
            AppError::BadRequest(_) => "bad_request",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// The message sent to the client as `detail`.
    pub fn detail(&self) -> &str {
        match self {
            AppError::Unauthorized(msg)
            | AppError::BadRequest(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

/// Implementation of the Display trait for AppError.
///
/// ## Purpose:
/// Used whenever an error is logged (`%err` in tracing fields) or converted
/// to a string. The HTTP body uses `detail()` instead, without the prefix.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Implementation of the ResponseError trait for AppError.
///
/// ## HTTP Status Code Mapping:
/// - Unauthorized → 401 (Unauthorized)
/// - BadRequest → 400 (Bad Request)
/// - PayloadTooLarge → 413 (Payload Too Large)
/// - Internal → 500 (Internal Server Error)
///
/// ## Rust Concepts:
/// - **status_code()**: actix uses this for logging and for the default response
/// - **error_response()**: builds the JSON body the client actually receives
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,       // 401
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,          // 400
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE, // 413
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,  // 500
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());

        // Bearer challenge, as RFC 6750 asks for on 401
        if matches!(self, AppError::Unauthorized(_)) {
            builder.insert_header((actix_web::http::header::WWW_AUTHENTICATE, "Bearer"));
        }

        builder.json(json!({
            "detail": self.detail(),  // Human-readable error message
            "type": self.kind(),      // Machine-readable error type
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// ## Usage:
/// When you use `?` with an anyhow::Error inside a handler, it becomes an
/// `AppError::Internal`. The full context chain is kept in the message.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// Type alias for Results that use our custom error type.
///
/// ## Usage Example:
/// ```rust
/// async fn handler() -> AppResult<HttpResponse> {
///     // Equivalent to: Result<HttpResponse, AppError>
///     Ok(HttpResponse::Ok().finish())
/// }
/// ```
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::PayloadTooLarge("x".into()).status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(AppError::Internal("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_error_body_carries_detail() {
        let response = AppError::BadRequest("Model not found: huge".to_string()).error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "Model not found: huge");
        assert_eq!(json["type"], "bad_request");
    }

    #[test]
    fn test_unauthorized_sets_challenge_header() {
        let response = AppError::Unauthorized("Invalid API Key".to_string()).error_response();
        let challenge = response
            .headers()
            .get(actix_web::http::header::WWW_AUTHENTICATE)
            .unwrap();
        assert_eq!(challenge, "Bearer");
    }

    #[test]
    fn test_anyhow_conversion_keeps_context() {
        let err = anyhow::anyhow!("disk full").context("writing upload");
        let app_err: AppError = err.into();
        assert_eq!(app_err.detail(), "writing upload: disk full");
    }
}
