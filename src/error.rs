//! Central error type. Every fallible public operation returns `Result<T, AppError>`;
//! at the HTTP boundary it renders as `{error, details, timestamp}` with the status
//! code matching its kind, per the error handling design.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    Auth(String),
    NotFound(String),
    UpstreamTransient(String),
    UpstreamHard(String),
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UpstreamTransient(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamHard(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::Validation(m)
            | AppError::Auth(m)
            | AppError::NotFound(m)
            | AppError::UpstreamTransient(m)
            | AppError::UpstreamHard(m)
            | AppError::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let body = Json(json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "details": self.message(),
            "timestamp": crate::util::now_unix(),
        }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
