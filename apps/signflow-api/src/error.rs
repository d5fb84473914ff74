//! Error types for the signflow API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use signflow_core::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Signature request not found: {0}")]
    RequestNotFound(String),

    #[error("Document not found")]
    DocumentNotFound,

    /// Management calls must identify the acting user.
    #[error("Missing X-Actor header")]
    ActorRequired,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::DocumentNotFinalized => (StatusCode::BAD_REQUEST, "NOT_FINALIZED"),
                EngineError::ActiveRequestExists => (StatusCode::CONFLICT, "ACTIVE_REQUEST_EXISTS"),
                EngineError::AccessDenied => (StatusCode::UNAUTHORIZED, "ACCESS_DENIED"),
                EngineError::InvalidSigners(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNERS"),
                // The signer surface does not distinguish unknown from
                // revoked tokens.
                EngineError::TokenInvalid => (StatusCode::NOT_FOUND, "TOKEN_INVALID"),
                EngineError::AlreadySigned => (StatusCode::CONFLICT, "ALREADY_SIGNED"),
                EngineError::AlreadyDeclined => (StatusCode::CONFLICT, "ALREADY_DECLINED"),
                EngineError::NotYourTurn => (StatusCode::CONFLICT, "NOT_YOUR_TURN"),
                EngineError::RequestClosed => (StatusCode::CONFLICT, "REQUEST_CLOSED"),
                EngineError::RequestExpired => (StatusCode::GONE, "REQUEST_EXPIRED"),
                EngineError::NoPendingSigners => (StatusCode::BAD_REQUEST, "NO_PENDING_SIGNERS"),
                EngineError::IntegrityFailure => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "INTEGRITY_FAILURE")
                }
                EngineError::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            },
            ApiError::RequestNotFound(_) => (StatusCode::NOT_FOUND, "REQUEST_NOT_FOUND"),
            ApiError::DocumentNotFound => (StatusCode::NOT_FOUND, "DOCUMENT_NOT_FOUND"),
            ApiError::ActorRequired => (StatusCode::UNAUTHORIZED, "ACTOR_REQUIRED"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            ApiError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                "Internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": code,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
