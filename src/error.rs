use crate::engine::{EngineError, Entity};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Shown to admins when a statement action does not match its status.
pub const STATEMENT_STATE_MESSAGE: &str = "this statement is not in the right state for this action";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidTransition {
                entity: Entity::Statement,
                ..
            } => AppError::Conflict(STATEMENT_STATE_MESSAGE.to_string()),
            EngineError::InvalidTransition { .. }
            | EngineError::DuplicateReferral { .. }
            | EngineError::SelfReferral(_)
            | EngineError::PeriodNotLocked(_)
            | EngineError::PeriodAlreadyLocked(_)
            | EngineError::AggregationAlreadyRun(_) => AppError::Conflict(err.to_string()),
            EngineError::MissingReference | EngineError::CodeInactive(_) => {
                AppError::BadRequest(err.to_string())
            }
            EngineError::CodeNotFound(_) | EngineError::NotFound { .. } => {
                AppError::NotFound(err.to_string())
            }
            EngineError::Directory(_) | EngineError::Money(_) | EngineError::Db(_) => {
                tracing::error!(error = %err, "Request failed");
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
