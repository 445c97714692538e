// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Errors raised by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Postgres reports unique violations with SQLSTATE 23505.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::UniqueViolation(db_err.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

/// Typed results of the question engine.
/// `ScopeEmpty`, `InsufficientPool` and `ScopeTooBroad` are expected outcomes
/// the UI reacts to, not failures of the service.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("scope descriptor selects nothing")]
    ScopeEmpty,

    #[error("requested {requested} questions but only {available} are eligible")]
    InsufficientPool { requested: usize, available: usize },

    #[error("scope matches more than {limit} questions")]
    ScopeTooBroad { limit: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("window end must be after start")]
    InvalidWindow,

    #[error("period {0} has not closed yet")]
    PeriodNotClosed(String),

    #[error("test session {0} not found")]
    SessionNotFound(i64),

    #[error("test session {0} is already completed")]
    SessionClosed(i64),

    #[error("question {question_id} is not part of session {session_id}")]
    QuestionNotInSession { session_id: i64, question_id: i64 },

    #[error("question {0} was already answered in this session")]
    AlreadyAnswered(i64),

    #[error("progress update for topic {topic} kept conflicting")]
    AggregationConflict { topic: i32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., session already completed)
    Conflict(String),

    // 422 Unprocessable, with a machine-readable code the UI branches on
    Unprocessable(&'static str, String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            AppError::Unprocessable(code, msg) => (StatusCode::UNPROCESSABLE_ENTITY, code, msg),
        };
        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let msg = err.to_string();
        match err {
            EngineError::ScopeEmpty => AppError::Unprocessable("SCOPE_EMPTY", msg),
            EngineError::InsufficientPool { .. } => {
                AppError::Unprocessable("INSUFFICIENT_POOL", msg)
            }
            EngineError::ScopeTooBroad { .. } => AppError::Unprocessable("SCOPE_TOO_BROAD", msg),
            EngineError::InvalidRequest(_) | EngineError::InvalidWindow => {
                AppError::BadRequest(msg)
            }
            EngineError::PeriodNotClosed(_) => AppError::Conflict(msg),
            EngineError::SessionNotFound(_) => AppError::NotFound(msg),
            EngineError::SessionClosed(_) | EngineError::AlreadyAnswered(_) => {
                AppError::Conflict(msg)
            }
            EngineError::QuestionNotInSession { .. } => AppError::BadRequest(msg),
            EngineError::AggregationConflict { .. } => AppError::Conflict(msg),
            EngineError::Store(e) => AppError::from(e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
