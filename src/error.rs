use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced by a store backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (duplicate short code).
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    /// The query needs an index the store does not have.
    #[error("missing index: {0}")]
    MissingIndex(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_owned())
            }
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Errors returned by the services and rendered by the HTTP layer.
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("custom short code already exists: {0}")]
    CodeConflict(String),
    #[error("no unused short code found after {0} attempts")]
    AllocationExhausted(u32),
    #[error("short link not found: {0}")]
    LinkNotFound(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("authentication required")]
    Unauthorized,
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::CodeConflict(_) => "code_conflict",
            Self::AllocationExhausted(_) => "allocation_exhausted",
            Self::LinkNotFound(_) => "link_not_found",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Unauthorized => "unauthorized",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::CodeConflict(_) => StatusCode::CONFLICT,
            Self::AllocationExhausted(_) | Self::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::LinkNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}
