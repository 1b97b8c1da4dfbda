use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::extract::InvoiceData;
use crate::retry;

use super::audit::{AuditError, AuditRecord, AuditRepository, NewAuditRecord};
use super::ledger::{LedgerError, LedgerWriter, NewLedgerEntry};
use super::repository::{ReviewError, ReviewItemRepository};
use super::types::Decision;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error("ledger write failed: {0}")]
    Ledger(#[from] LedgerError),
    #[error("audit write failed: {0}")]
    Audit(#[from] AuditError),
}

/// Everything the reviewer submits with an accept or reject.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub message_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub message_date: Option<DateTime<Utc>>,
    pub attachment_filename: Option<String>,
    pub blob_url: Option<String>,
    pub email_text: Option<String>,
    pub extracted: InvoiceData,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AcceptOutcome {
    pub expense_id: String,
    pub audit_record: AuditRecord,
}

/// Applies terminal decisions to review items: accept commits a ledger entry
/// and an audit record, reject writes the audit record only. Each item takes
/// exactly one decision.
pub struct ReviewWorkflow {
    items: ReviewItemRepository,
    audit: AuditRepository,
    ledger: Arc<dyn LedgerWriter>,
}

impl ReviewWorkflow {
    pub fn new(
        items: ReviewItemRepository,
        audit: AuditRepository,
        ledger: Arc<dyn LedgerWriter>,
    ) -> Self {
        Self {
            items,
            audit,
            ledger,
        }
    }

    pub async fn accept(&self, request: DecisionRequest) -> Result<AcceptOutcome, WorkflowError> {
        let item = self.claim(&request, Decision::Accepted).await?;

        let entry = build_ledger_entry(&request);
        let ledger_entry = retry::with_retries("ledger append", || {
            self.ledger.append(entry.clone())
        })
        .await?;

        let audit_record = self
            .append_audit(&request, Decision::Accepted, Some(ledger_entry.id.clone()))
            .await?;

        info!(
            review_item = %item.id,
            expense_id = %ledger_entry.id,
            "review item accepted"
        );

        Ok(AcceptOutcome {
            expense_id: ledger_entry.id,
            audit_record,
        })
    }

    pub async fn reject(&self, request: DecisionRequest) -> Result<AuditRecord, WorkflowError> {
        let item = self.claim(&request, Decision::Rejected).await?;

        let audit_record = self.append_audit(&request, Decision::Rejected, None).await?;

        info!(review_item = %item.id, "review item rejected");

        Ok(audit_record)
    }

    /// Resolve the pending item and move it to its terminal state. This is
    /// the single synchronized path; a second decision for the same item
    /// fails here before any ledger or audit write happens.
    async fn claim(
        &self,
        request: &DecisionRequest,
        decision: Decision,
    ) -> Result<super::types::ReviewItem, WorkflowError> {
        let item = self
            .items
            .find_latest(&request.message_id, request.attachment_filename.as_deref())
            .await?
            .ok_or_else(|| {
                ReviewError::NotFound(format!(
                    "no review item for message {}",
                    request.message_id
                ))
            })?;

        let (category_id, subcategory_id) = match decision {
            Decision::Accepted => (request.category_id, request.subcategory_id),
            Decision::Rejected => (None, None),
        };

        Ok(self
            .items
            .decide(&item.id, decision, category_id, subcategory_id)
            .await?)
    }

    async fn append_audit(
        &self,
        request: &DecisionRequest,
        decision: Decision,
        linked_expense_id: Option<String>,
    ) -> Result<AuditRecord, WorkflowError> {
        let extracted_payload = serde_json::to_value(&request.extracted)
            .unwrap_or_else(|_| serde_json::Value::Null);
        let record = NewAuditRecord {
            message_id: request.message_id.clone(),
            subject: request.subject.clone(),
            sender: request.sender.clone(),
            message_date: request.message_date,
            attachment_filename: request.attachment_filename.clone(),
            blob_url: request.blob_url.clone(),
            extracted_payload,
            decision,
            linked_expense_id,
        };

        Ok(retry::with_retries("audit append", || {
            self.audit.append(record.clone())
        })
        .await?)
    }
}

fn build_ledger_entry(request: &DecisionRequest) -> NewLedgerEntry {
    let extracted = &request.extracted;
    let description = extracted.description.clone().unwrap_or_else(|| {
        format!(
            "Invoice from {}",
            extracted.sender.as_deref().unwrap_or("unknown sender")
        )
    });

    let subject = request.subject.as_deref().unwrap_or("(No subject)");
    let from = request.sender.as_deref().unwrap_or("");
    let original_text = match &request.email_text {
        Some(text) => format!("Email: {subject} | From: {from}\n\n{text}"),
        None => format!("Email: {subject} | From: {from}"),
    };

    NewLedgerEntry {
        description,
        amount: extracted.amount.unwrap_or(0.0),
        currency: extracted.currency.clone(),
        category_id: request.category_id,
        subcategory_id: request.subcategory_id,
        original_text: Some(original_text),
        document_url: request.blob_url.clone(),
    }
}
