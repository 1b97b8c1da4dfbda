use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, DbError};

use super::types::Decision;

const AUDIT_COLUMNS: &str = "id, message_id, subject, sender, message_date, attachment_filename, blob_url, extracted_json, decision, linked_expense_id, decided_at";

const RECENT_AUDIT_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("invalid decision value {0}")]
    InvalidDecision(String),
    #[error("audit insert failed")]
    InsertFailed,
}

/// One immutable line per decision. Records are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: String,
    pub message_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub message_date: Option<DateTime<Utc>>,
    pub attachment_filename: Option<String>,
    pub blob_url: Option<String>,
    pub extracted_payload: Value,
    pub decision: Decision,
    pub linked_expense_id: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditRecord {
    pub message_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub message_date: Option<DateTime<Utc>>,
    pub attachment_filename: Option<String>,
    pub blob_url: Option<String>,
    pub extracted_payload: Value,
    pub decision: Decision,
    pub linked_expense_id: Option<String>,
}

#[derive(Clone)]
pub struct AuditRepository {
    db: Database,
}

impl AuditRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn append(&self, record: NewAuditRecord) -> Result<AuditRecord, AuditError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let extracted_json = serde_json::to_string(&record.extracted_payload)?;
        let message_date = record
            .message_date
            .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true));

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO audit_records (
                        id, message_id, subject, sender, message_date, attachment_filename,
                        blob_url, extracted_json, decision, linked_expense_id, decided_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    RETURNING {AUDIT_COLUMNS}"
                ),
                params![
                    id,
                    record.message_id,
                    record.subject,
                    record.sender,
                    message_date,
                    record.attachment_filename,
                    record.blob_url,
                    extracted_json,
                    record.decision.as_str(),
                    record.linked_expense_id,
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_audit_record(row),
            None => Err(AuditError::InsertFailed),
        }
    }

    /// Most recent decisions, newest first.
    pub async fn list_recent(&self) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {AUDIT_COLUMNS}
                     FROM audit_records
                     ORDER BY decided_at DESC, id
                     LIMIT ?1"
                ),
                params![RECENT_AUDIT_LIMIT],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_audit_record(row)?);
        }
        Ok(records)
    }

    pub async fn count(&self) -> Result<i64, AuditError> {
        let conn = self.db.connection().await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM audit_records", ()).await?;
        let row = rows.next().await?.ok_or(AuditError::InsertFailed)?;
        Ok(row.get(0)?)
    }
}

fn row_to_audit_record(row: Row) -> Result<AuditRecord, AuditError> {
    let extracted_json: String = row.get(7)?;
    let decision_raw: String = row.get(8)?;
    let decision = Decision::from_str(&decision_raw)
        .ok_or_else(|| AuditError::InvalidDecision(decision_raw.clone()))?;

    let message_date: Option<String> = row.get(4)?;
    let decided_at: String = row.get(10)?;

    Ok(AuditRecord {
        id: row.get(0)?,
        message_id: row.get(1)?,
        subject: row.get(2)?,
        sender: row.get(3)?,
        message_date: message_date
            .map(|raw| DateTime::parse_from_rfc3339(&raw).map(|d| d.with_timezone(&Utc)))
            .transpose()?,
        attachment_filename: row.get(5)?,
        blob_url: row.get(6)?,
        extracted_payload: serde_json::from_str(&extracted_json)?,
        decision,
        linked_expense_id: row.get(9)?,
        decided_at: DateTime::parse_from_rfc3339(&decided_at)?.with_timezone(&Utc),
    })
}
