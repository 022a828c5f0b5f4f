//! # Error Handling
//!
//! Custom error types for the bridge and their conversion into HTTP
//! responses. The taxonomy follows the bridge's failure model:
//!
//! - **Setup failures** (negotiation or backend connect) happen before a
//!   session exists; the caller leg is closed and nothing is registered.
//! - **Protocol violations** (malformed JSON, out-of-order events) are
//!   logged and ignored at the WebSocket layer; they never surface here.
//! - **HTTP-layer errors** (bad webhook requests, config problems) are the
//!   ones that become `AppError` responses.
//!
//! All error responses share one JSON structure:
//! ```json
//! {
//!   "error": {
//!     "type": "negotiation_failed",
//!     "message": "backend returned 401",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **Negotiation**: Backend session negotiation failed (502 errors)
/// - **BackendConnect**: Realtime streaming connect failed (502 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// The one-shot session negotiation with the translation backend failed
    Negotiation(String),

    /// The realtime streaming connection to the backend failed
    BackendConnect(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Negotiation(msg) => write!(f, "Session negotiation failed: {}", msg),
            AppError::BackendConnect(msg) => write!(f, "Backend connect failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts bridge errors into HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500 (Internal Server Error)
/// - BadRequest → 400 (Bad Request)
/// - NotFound → 404 (Not Found)
/// - Negotiation/BackendConnect → 502 (Bad Gateway); the bridge is fine,
///   the upstream translation backend is not
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::Negotiation(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "negotiation_failed",
                msg.clone(),
            ),
            AppError::BackendConnect(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "backend_connect_failed",
                msg.clone(),
            ),
        };

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

/// JSON parsing errors are almost always the client's fault.
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

/// The negotiation call is the only place we issue request/response HTTP;
/// a transport-level failure there is a negotiation failure.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Negotiation(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_setup_failures_map_to_bad_gateway() {
        let err = AppError::Negotiation("backend returned 401".to_string());
        assert_eq!(
            err.error_response().status(),
            StatusCode::BAD_GATEWAY
        );

        let err = AppError::BackendConnect("timed out".to_string());
        assert_eq!(
            err.error_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_display_carries_context() {
        let err = AppError::Negotiation("no session id in response".to_string());
        assert!(err.to_string().contains("negotiation"));
        assert!(err.to_string().contains("no session id"));
    }
}
