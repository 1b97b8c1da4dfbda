//! HTTP API for the ingestion pipeline.
//!
//! - `/api/mailbox`: OAuth connection, candidate discovery, per-item
//!   processing, accept/reject decisions, audit history
//! - `/api/storage`: blob-store OAuth connection and status

pub mod mailbox;
pub mod storage;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use serde_json::json;

use invox_core::mailbox::MailboxError;
use invox_core::oauth::TokenError;
use invox_core::pipeline::PipelineError;
use invox_core::review::{AuditError, ReviewError, WorkflowError};
use invox_core::storage::StorageError;

use crate::AppState;

/// Create the API router with all endpoints mounted.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/mailbox", mailbox::router())
        .nest("/storage", storage::router())
}

/// Redirect back to the configured frontend with result flags in the query.
pub(crate) fn frontend_redirect(state: &AppState, params: &[(&str, &str)]) -> Redirect {
    let base = &state.config.frontend.url;
    match reqwest::Url::parse_with_params(base, params) {
        Ok(url) => Redirect::to(url.as_str()),
        Err(_) => Redirect::to(base),
    }
}

/// Uniform error body: `{"error": "..."}` with a non-2xx status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match &err {
            TokenError::NotConnected(_) => ApiError::unauthorized(err.to_string()),
            _ => ApiError::internal(err.to_string()),
        }
    }
}

impl From<MailboxError> for ApiError {
    fn from(err: MailboxError) -> Self {
        match &err {
            MailboxError::Unauthorized => ApiError::unauthorized(err.to_string()),
            MailboxError::Token(TokenError::NotConnected(_)) => {
                ApiError::unauthorized(err.to_string())
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::Unauthorized => ApiError::unauthorized(err.to_string()),
            StorageError::Token(TokenError::NotConnected(_)) => {
                ApiError::unauthorized(err.to_string())
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match &err {
            WorkflowError::Review(ReviewError::NotFound(_)) => ApiError::not_found(err.to_string()),
            WorkflowError::Review(ReviewError::AlreadyDecided { .. }) => {
                ApiError::conflict(err.to_string())
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        ApiError::internal(err.to_string())
    }
}
