use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::spec::{FieldIssue, SpecError};
use crate::utils::response::{error as error_response, ErrorBody};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(Vec<FieldIssue>),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Contract error")]
    Spec(#[from] SpecError),

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) | AppError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Spec(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn log(&self) {
        match self {
            AppError::Validation(details) => {
                error!(?details, "Request failed schema validation");
            }
            AppError::PayloadTooLarge(limit) => {
                error!(limit, "Request body exceeded the size limit");
            }
            AppError::Unauthorized(msg)
            | AppError::NotFound(msg)
            | AppError::RouteNotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Internal(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::Spec(e) => {
                error!(error = ?e, "Contract error");
            }
            AppError::Database(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log internal details before anything is written to the client.
        self.log();

        // Every error body is JSON with at least an `error` key. Internal
        // failures get a generic message; details never leak.
        let body = match self {
            AppError::Validation(details) => ErrorBody::with_details("Validation failed", details),
            AppError::PayloadTooLarge(limit) => ErrorBody::with_message(
                "Payload too large",
                format!("Request body exceeds the {} byte limit", limit),
            ),
            AppError::Unauthorized(msg) => ErrorBody::with_message("Unauthorized", msg),
            AppError::NotFound(msg) => ErrorBody::with_message("Not found", msg),
            AppError::RouteNotFound(path) => ErrorBody::with_path("Route not found", path),
            AppError::Conflict(msg) => ErrorBody::with_message("Conflict", msg),
            AppError::Spec(_) | AppError::Database(_) | AppError::Internal(_) => {
                ErrorBody::with_message("Internal server error", "An unexpected error occurred")
            }
        };

        error_response(status, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_error_taxonomy() {
        assert_eq!(
            AppError::Validation(vec![]).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::PayloadTooLarge(1024).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::RouteNotFound("/nope".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Conflict("dup".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
