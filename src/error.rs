use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Why a generation call produced nothing usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationFailure {
    NoJsonFound,
    InvalidJson,
    SchemaMismatch,
    TransportError,
}

impl GenerationFailure {
    pub fn code(self) -> &'static str {
        match self {
            GenerationFailure::NoJsonFound => "no-json-found",
            GenerationFailure::InvalidJson => "invalid-json",
            GenerationFailure::SchemaMismatch => "schema-mismatch",
            GenerationFailure::TransportError => "transport-error",
        }
    }
}

impl std::fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Error)]
#[error("generation failed ({reason}): {detail}")]
pub struct GenerationError {
    pub reason: GenerationFailure,
    pub detail: String,
}

impl GenerationError {
    pub fn new(reason: GenerationFailure, detail: impl Into<String>) -> Self {
        Self { reason, detail: detail.into() }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::new(GenerationFailure::TransportError, detail)
    }
}

#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("store rejected request: status={status} body={body}")]
    Rejected { status: u16, body: String },
    #[error("could not decode store response: {0}")]
    Decode(String),
    #[error("record {0} not found for this owner")]
    NotFound(uuid::Uuid),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("sign in required")]
    AuthRequired,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short category used in user-facing notifications and error bodies.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::AuthRequired => "auth-required",
            AppError::Repository(_) => "repository-error",
            AppError::Generation(e) => e.reason.code(),
            AppError::InvalidInput(_) => "invalid-input",
            AppError::NotFound => "not-found",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound | AppError::Repository(RepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Repository(_) | AppError::Generation(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = json!({ "error": self.category(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}
