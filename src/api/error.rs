use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

use crate::db::DatabaseError;
use crate::engine::AwardError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
    Database(String),
    Validation(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ApiError::Database(msg) => write!(f, "Database error: {}", msg),
            ApiError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error", msg),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => ApiError::NotFound(msg),
            DatabaseError::InvalidData(msg) => ApiError::Validation(msg),
            // Storage details stay in the server log; callers get a
            // generic failure
            other => {
                tracing::error!("Database operation failed: {}", other);
                ApiError::Database("database operation failed".to_string())
            }
        }
    }
}

impl From<AwardError> for ApiError {
    fn from(err: AwardError) -> Self {
        match err {
            AwardError::InvalidAmount(amount) => ApiError::BadRequest(format!(
                "award amount must be a positive integer, got {}",
                amount
            )),
            AwardError::UserNotFound(user_id) => {
                ApiError::NotFound(format!("no progress record for user {}", user_id))
            }
            AwardError::Persistence(e) => {
                tracing::error!("Award persistence failure: {}", e);
                ApiError::Database("award could not be persisted".to_string())
            }
            AwardError::RetryLimitExceeded { user_id, attempts } => {
                tracing::error!(
                    "Award for user {} exhausted {} attempts",
                    user_id,
                    attempts
                );
                ApiError::Database("award could not be persisted".to_string())
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
