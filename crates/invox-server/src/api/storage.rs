//! Blob-store endpoints: OAuth connection and status.

use axum::response::Redirect;
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use invox_core::oauth::Provider;

use crate::AppState;

use super::{ApiError, frontend_redirect};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth-url", get(auth_url))
        .route("/callback", get(callback))
        .route("/status", get(status))
        .route("/disconnect", post(disconnect))
}

async fn auth_url(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let url = state.tokens.auth_url(Provider::Dropbox)?;
    Ok(Json(json!({ "authUrl": url })))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
}

async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, ApiError> {
    let Some(code) = query.code else {
        return Err(ApiError::bad_request("authorization code not provided"));
    };

    match state.tokens.exchange_code(Provider::Dropbox, &code).await {
        Ok(_) => Ok(frontend_redirect(&state, &[("storage_connected", "true")])),
        Err(err) => {
            error!(error = %err, "storage oauth callback failed");
            Ok(frontend_redirect(
                &state,
                &[("storage_error", &err.to_string())],
            ))
        }
    }
}

/// Connection status, verified with a cheap account call. Covers both
/// OAuth-stored tokens and a configured static token.
async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    use invox_core::oauth::TokenError;
    use invox_core::storage::StorageError;

    match state.storage.get_current_account().await {
        Ok(account) => Ok(Json(json!({
            "connected": true,
            "email": account.email,
        }))),
        Err(StorageError::Token(TokenError::NotConnected(_))) => {
            Ok(Json(json!({ "connected": false })))
        }
        Err(err) => Ok(Json(json!({
            "connected": false,
            "error": err.to_string(),
        }))),
    }
}

async fn disconnect(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.tokens.disconnect(Provider::Dropbox).await?;
    Ok(Json(json!({ "disconnected": true })))
}
