use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use crate::authority::AuthorityError;
use crate::company::CompanyError;
use crate::models::EventStatus;
use crate::signer::SignerError;

/// Persistence failures from a [`crate::store::ContingencyStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Failures of a single pipeline operation. None of these halt a worker pass.
#[derive(Debug, thiserror::Error)]
pub enum ContingencyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("authority: {0}")]
    Authority(#[from] AuthorityError),
    #[error("signer: {0}")]
    Signer(#[from] SignerError),
    #[error("company: {0}")]
    Company(#[from] CompanyError),
    #[error("failed to encode payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("no pending documents for company {0}")]
    NoPendingDocuments(Uuid),
    #[error("too many documents: max {max}, got {count}")]
    TooManyDocuments { count: usize, max: usize },
    #[error("{count} documents of event {event_id} are not signed")]
    MissingSignature { event_id: Uuid, count: usize },
    #[error("event {0} not found")]
    EventNotFound(Uuid),
    #[error("event {event_id} is not accepted (status: {status})")]
    EventNotAccepted { event_id: Uuid, status: EventStatus },
    #[error("contingency event refused: {estado} - {message}")]
    EventRefused { estado: String, message: String },
    #[error("batch refused: {estado} - {message}")]
    BatchRefused { estado: String, message: String },
    #[error("batch {0} has no codigo_lote")]
    MissingLoteCode(Uuid),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal Error: {0}")]
    Internal(String),
    #[error("Store Error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Store(err) => {
                tracing::error!("Store error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<ContingencyError> for AppError {
    fn from(err: ContingencyError) -> Self {
        match err {
            ContingencyError::Store(e) => AppError::Store(e),
            ContingencyError::InvalidDocument(msg) => AppError::BadRequest(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}
