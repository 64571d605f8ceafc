use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// One schema violation, addressed by JSON-pointer-style path.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("validation failed")]
    Validation(Vec<ValidationError>),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("immutable: {0}")]
    Immutable(String),
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),
    #[error("no agent available")]
    NoAgentAvailable,
    #[error("timeout")]
    Timeout,
    #[error("{0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                AppError::Conflict("unique constraint violated".into())
            }
            _ => AppError::Db(err),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_)
            | AppError::Validation(_)
            | AppError::InvalidTransition(_)
            | AppError::Immutable(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::PoolExhausted(_) | AppError::NoAgentAvailable => {
                StatusCode::CONFLICT
            }
            AppError::Timeout | AppError::Db(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    error: String,
    #[serde(rename = "validationErrors", skip_serializing_if = "Option::is_none")]
    validation_errors: Option<Vec<ValidationError>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal detail stays in the logs; the body carries the class only.
        let message = match &self {
            AppError::Db(e) => {
                tracing::error!(error = ?e, "database error");
                "internal error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!(%msg, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let validation_errors = match self {
            AppError::Validation(errors) => Some(errors),
            _ => None,
        };
        let body = ErrorBody {
            status: status.as_u16(),
            error: message,
            validation_errors,
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
