use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Uniform API error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Reason phrase for the HTTP status
    pub error: String,

    /// Client-facing message. Never carries storage or crypto detail.
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Error family for client-side routing
    /// ("validation_error", "authentication_error", "authorization_error",
    /// "not_found_error", "conflict_error", "rate_limit_error", "server_error")
    pub error_type: String,

    /// Stable code for client localization and tracking
    pub code: String,

    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

// Map domain errors to HTTP responses
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::BadRequest(_) => ("validation_error", "INVALID_REQUEST"),
        AppError::Validation(_) => ("validation_error", "CONTENT_REJECTED"),
        AppError::Unauthorized => ("authentication_error", "INVALID_CREDENTIALS"),
        AppError::Forbidden => ("authorization_error", "AUTHORIZATION_ERROR"),
        AppError::NotFound => ("not_found_error", "NOT_FOUND"),
        AppError::Conflict(_) => ("conflict_error", "DUPLICATE_CONVERSATION"),
        AppError::RateLimited { .. } => ("rate_limit_error", "RATE_LIMIT_EXCEEDED"),
        AppError::Config(_) => ("server_error", "INTERNAL_SERVER_ERROR"),
        AppError::StartServer(_) => ("server_error", "INTERNAL_SERVER_ERROR"),
        AppError::Database(_) => ("server_error", "DATABASE_ERROR"),
        AppError::Encryption(_) => ("server_error", "ENCRYPTION_ERROR"),
        AppError::Internal => ("server_error", "INTERNAL_SERVER_ERROR"),
    };

    let message = match err {
        // Storage and crypto detail stays in the logs.
        AppError::Database(_)
        | AppError::Encryption(_)
        | AppError::Internal
        | AppError::Config(_)
        | AppError::StartServer(_) => "internal server error".to_string(),
        // Uniform throttle response, no window state.
        AppError::RateLimited { .. } => "too many requests, please try again later".to_string(),
        other => other.to_string(),
    };

    let response = ErrorResponse::new(
        match status {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::UNAUTHORIZED => "Unauthorized",
            StatusCode::FORBIDDEN => "Forbidden",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::CONFLICT => "Conflict",
            StatusCode::TOO_MANY_REQUESTS => "Too Many Requests",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        },
        &message,
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

pub fn into_response(err: AppError) -> axum::response::Response {
    let (status, response) = map_error(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    (status, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400_with_joined_errors() {
        let err = AppError::Validation(vec!["empty content".into(), "too long".into()]);
        let (status, body) = map_error(&err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error_type, "validation_error");
        assert!(body.message.contains("empty content"));
        assert!(body.message.contains("too long"));
    }

    #[test]
    fn rate_limited_body_does_not_leak_window_state() {
        let err = AppError::RateLimited {
            retry_after_secs: 42,
        };
        let (status, body) = map_error(&err);
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body.error, "Too Many Requests");
        assert_eq!(body.code, "RATE_LIMIT_EXCEEDED");
        assert!(!body.message.contains("42"));
    }

    #[test]
    fn database_error_body_is_generic() {
        let err = AppError::Database(sqlx::Error::RowNotFound);
        let (status, body) = map_error(&err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "DATABASE_ERROR");
        assert_eq!(body.message, "internal server error");
    }

    #[test]
    fn not_found_maps_to_404() {
        let (status, body) = map_error(&AppError::NotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error_type, "not_found_error");
        assert_eq!(body.status, 404);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let (status, body) = map_error(&AppError::Forbidden);
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.error_type, "authorization_error");
    }
}
