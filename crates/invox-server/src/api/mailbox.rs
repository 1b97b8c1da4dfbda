//! Mailbox endpoints: OAuth connection, candidate discovery, per-item
//! processing, accept/reject decisions, and the audit trail.

use axum::response::Redirect;
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;

use invox_core::extract::InvoiceData;
use invox_core::mailbox::types::AttachmentRef;
use invox_core::oauth::Provider;
use invox_core::pipeline::MessageContext;
use invox_core::review::DecisionRequest;

use crate::AppState;

use super::{ApiError, frontend_redirect};

const DEFAULT_MAX_RESULTS: u32 = 50;
const EMAIL_TEXT_ECHO_CHARS: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth-url", get(auth_url))
        .route("/callback", get(callback))
        .route("/status", get(status))
        .route("/disconnect", post(disconnect))
        .route("/fetch-emails", post(fetch_emails))
        .route("/process-attachment", post(process_attachment))
        .route("/process-email-text", post(process_email_text))
        .route("/accept-invoice", post(accept_invoice))
        .route("/reject-invoice", post(reject_invoice))
        .route("/audit", get(audit))
}

async fn auth_url(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let url = state.tokens.auth_url(Provider::Gmail)?;
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

    match state.tokens.exchange_code(Provider::Gmail, &code).await {
        Ok(stored) => {
            let email = stored.identity.unwrap_or_default();
            Ok(frontend_redirect(
                &state,
                &[("mailbox_connected", "true"), ("email", &email)],
            ))
        }
        Err(err) => {
            error!(error = %err, "mailbox oauth callback failed");
            Ok(frontend_redirect(
                &state,
                &[("mailbox_error", &err.to_string())],
            ))
        }
    }
}

async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.tokens.current(Provider::Gmail).await? {
        Some(stored) => Ok(Json(json!({
            "connected": true,
            "email": stored.identity,
        }))),
        None => Ok(Json(json!({ "connected": false, "email": null }))),
    }
}

async fn disconnect(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.tokens.disconnect(Provider::Gmail).await?;
    Ok(Json(json!({ "disconnected": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchEmailsRequest {
    start_date: String,
    end_date: String,
    max_results: Option<u32>,
}

async fn fetch_emails(
    State(state): State<AppState>,
    Json(request): Json<FetchEmailsRequest>,
) -> Result<Json<Value>, ApiError> {
    let start = parse_date(&request.start_date)
        .ok_or_else(|| ApiError::bad_request("startDate and endDate required"))?;
    let end = parse_date(&request.end_date)
        .ok_or_else(|| ApiError::bad_request("startDate and endDate required"))?;
    let max_results = request.max_results.unwrap_or(DEFAULT_MAX_RESULTS);

    let emails = state.finder.find_candidates(start, end, max_results).await?;

    Ok(Json(json!({
        "success": true,
        "count": emails.len(),
        "emails": emails,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessAttachmentRequest {
    message_id: String,
    attachment: AttachmentRef,
}

async fn process_attachment(
    State(state): State<AppState>,
    Json(request): Json<ProcessAttachmentRequest>,
) -> Result<Json<Value>, ApiError> {
    let context = MessageContext::new(&request.message_id);
    let processed = state
        .pipeline
        .process_attachment(&context, &request.attachment)
        .await?;

    Ok(Json(json!({
        "success": true,
        "dropboxUrl": processed.stored.as_ref().map(|s| s.url.clone()),
        "dropboxPath": processed.stored.as_ref().map(|s| s.path.clone()),
        "extraction": processed.extraction,
        "reviewItemId": processed.review_item.id,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessEmailTextRequest {
    message_id: String,
    subject: Option<String>,
    from: Option<String>,
    body_text: String,
}

async fn process_email_text(
    State(state): State<AppState>,
    Json(request): Json<ProcessEmailTextRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.body_text.is_empty() {
        return Err(ApiError::bad_request("messageId and bodyText required"));
    }

    let context = MessageContext {
        message_id: request.message_id.clone(),
        subject: request.subject.clone(),
        from: request.from.clone(),
        date: None,
    };
    let processed = state
        .pipeline
        .process_email_text(&context, &request.body_text)
        .await?;

    let echo: String = request.body_text.chars().take(EMAIL_TEXT_ECHO_CHARS).collect();
    Ok(Json(json!({
        "success": true,
        "extraction": processed.extraction,
        "emailText": echo,
        "reviewItemId": processed.review_item.id,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecisionBody {
    email_id: String,
    email_subject: Option<String>,
    email_from: Option<String>,
    email_date: Option<DateTime<Utc>>,
    attachment_filename: Option<String>,
    dropbox_url: Option<String>,
    email_text: Option<String>,
    extracted_data: InvoiceData,
    category_id: Option<i64>,
    subcategory_id: Option<i64>,
}

impl DecisionBody {
    fn into_request(self) -> DecisionRequest {
        DecisionRequest {
            message_id: self.email_id,
            subject: self.email_subject,
            sender: self.email_from,
            message_date: self.email_date,
            attachment_filename: self.attachment_filename,
            blob_url: self.dropbox_url,
            email_text: self.email_text,
            extracted: self.extracted_data,
            category_id: self.category_id,
            subcategory_id: self.subcategory_id,
        }
    }
}

async fn accept_invoice(
    State(state): State<AppState>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.workflow.accept(body.into_request()).await?;

    Ok(Json(json!({
        "success": true,
        "expenseId": outcome.expense_id,
    })))
}

async fn reject_invoice(
    State(state): State<AppState>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Value>, ApiError> {
    state.workflow.reject(body.into_request()).await?;

    Ok(Json(json!({ "success": true })))
}

async fn audit(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = state.audit.list_recent().await?;
    Ok(Json(json!(records)))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}
