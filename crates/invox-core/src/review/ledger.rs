use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, DbError};

const EXPENSE_COLUMNS: &str = "id, description, amount, currency, category_id, subcategory_id, status, payment_type, input_type, original_text, document_url, created_at, confirmed_at";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("ledger insert failed")]
    InsertFailed,
}

/// Write payload for one committed expense.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub original_text: Option<String>,
    pub document_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub status: String,
    pub payment_type: String,
    pub input_type: String,
    pub original_text: Option<String>,
    pub document_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Narrow write seam to the system of record. Entries are created only when
/// a review item is accepted.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, LedgerError>;
}

#[derive(Clone)]
pub struct LibsqlLedgerWriter {
    db: Database,
}

impl LibsqlLedgerWriter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn count(&self) -> Result<i64, LedgerError> {
        let conn = self.db.connection().await?;
        let mut rows = conn.query("SELECT COUNT(*) FROM expenses", ()).await?;
        let row = rows.next().await?.ok_or(LedgerError::InsertFailed)?;
        Ok(row.get(0)?)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_entry(row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LedgerWriter for LibsqlLedgerWriter {
    async fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, LedgerError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO expenses (
                        id, description, amount, currency, category_id, subcategory_id,
                        status, payment_type, input_type, original_text, document_url,
                        created_at, confirmed_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'confirmed', 'bank', 'email', ?7, ?8, ?9, ?9)
                    RETURNING {EXPENSE_COLUMNS}"
                ),
                params![
                    id,
                    entry.description,
                    entry.amount,
                    entry.currency,
                    entry.category_id,
                    entry.subcategory_id,
                    entry.original_text,
                    entry.document_url,
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_entry(row),
            None => Err(LedgerError::InsertFailed),
        }
    }
}

fn row_to_entry(row: Row) -> Result<LedgerEntry, LedgerError> {
    let created_at: String = row.get(11)?;
    let confirmed_at: Option<String> = row.get(12)?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        description: row.get(1)?,
        amount: row.get(2)?,
        currency: row.get(3)?,
        category_id: row.get(4)?,
        subcategory_id: row.get(5)?,
        status: row.get(6)?,
        payment_type: row.get(7)?,
        input_type: row.get(8)?,
        original_text: row.get(9)?,
        document_url: row.get(10)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        confirmed_at: confirmed_at
            .map(|raw| DateTime::parse_from_rfc3339(&raw).map(|d| d.with_timezone(&Utc)))
            .transpose()?,
    })
}
