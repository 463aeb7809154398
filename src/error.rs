//! # Error Handling
//!
//! Custom error types and their conversion to HTTP responses.
//!
//! ## Error Categories:
//! - **Validation**: a caller-supplied value is out of range (400 errors)
//! - **BadRequest**: malformed request bodies or parameters (400 errors)
//! - **UnknownAction**: unrecognized configure action name (400 errors)
//! - **Acquisition**: a sample source could not be set up (500 errors)
//! - **Export**: writing the CSV export failed (500 errors)
//! - **Config**: configuration file or environment problems (500 errors)
//! - **Internal**: everything else (500 errors)
//!
//! Transient acquisition failures inside a running session are deliberately
//! NOT represented here: the sampling loop logs them and retries, they never
//! surface to a caller.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
#[derive(Debug)]
pub enum AppError {
    /// User input failed validation rules (bad packet size, missing duration)
    Validation(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configure action name is not part of the supported action set
    UnknownAction(String),

    /// A sample source could not be constructed or configured
    Acquisition(String),

    /// Writing the export file failed (disk full, bad path)
    Export(String),

    /// Configuration file or environment variable problems
    Config(String),

    /// Internal server errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::UnknownAction(name) => write!(f, "Unknown action: {}", name),
            AppError::Acquisition(msg) => write!(f, "Acquisition error: {}", msg),
            AppError::Export(msg) => write!(f, "Export error: {}", msg),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Converts application errors into the JSON error envelope returned to
/// API clients:
///
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Packet size must be between 0 and 1023",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Validation(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::UnknownAction(name) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "unknown_action",
                format!("Unknown action: {}", name),
            ),
            AppError::Acquisition(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "acquisition_error",
                msg.clone(),
            ),
            AppError::Export(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "export_error",
                msg.clone(),
            ),
            AppError::Config(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
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

/// JSON parsing failures are the client's fault, not the server's.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = AppError::Validation("Packet size must be between 0 and 1023".to_string());
        assert_eq!(
            err.to_string(),
            "Validation error: Packet size must be between 0 and 1023"
        );

        let err = AppError::UnknownAction("flying_pig_mode".to_string());
        assert_eq!(err.to_string(), "Unknown action: flying_pig_mode");
    }

    #[test]
    fn test_status_codes() {
        use actix_web::http::StatusCode;

        assert_eq!(
            AppError::Validation(String::new()).error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::UnknownAction(String::new()).error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Export(String::new()).error_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
