use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Row, params};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, DbError};
use crate::extract::ExtractionResult;

use super::types::{Decision, NewReviewItem, ReviewItem, ReviewStatus};

const REVIEW_ITEM_COLUMNS: &str = "id, source_message_id, email_subject, email_from, email_date, attachment_filename, blob_path, blob_url, extraction_json, category_id, subcategory_id, status, created_at, decided_at";

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("review item not found: {0}")]
    NotFound(String),
    #[error("review item {id} already decided: {status}")]
    AlreadyDecided { id: String, status: ReviewStatus },
    #[error("invalid status value {0}")]
    InvalidStatus(String),
}

/// Review items live here from creation in `pending` until their single
/// terminal decision. The decision update is guarded on the current status so
/// two racing calls can never both win.
#[derive(Clone)]
pub struct ReviewItemRepository {
    db: Database,
}

impl ReviewItemRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, new_item: NewReviewItem) -> Result<ReviewItem, ReviewError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let extraction_json = serde_json::to_string(&new_item.extraction)?;
        let email_date = new_item.email_date.map(to_rfc3339);

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO review_items (
                        id, source_message_id, email_subject, email_from, email_date,
                        attachment_filename, blob_path, blob_url, extraction_json,
                        category_id, subcategory_id, status, created_at, decided_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL, 'pending', ?10, NULL)
                    RETURNING {REVIEW_ITEM_COLUMNS}"
                ),
                params![
                    id,
                    new_item.source_message_id,
                    new_item.email_subject,
                    new_item.email_from,
                    email_date,
                    new_item.attachment_filename,
                    new_item.blob_path,
                    new_item.blob_url,
                    extraction_json,
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_review_item(row),
            None => Err(ReviewError::NotFound("insert failed".into())),
        }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<ReviewItem, ReviewError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {REVIEW_ITEM_COLUMNS} FROM review_items WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_review_item(row),
            None => Err(ReviewError::NotFound(id.to_string())),
        }
    }

    /// Most recent item for a message/attachment pair, regardless of status.
    pub async fn find_latest(
        &self,
        source_message_id: &str,
        attachment_filename: Option<&str>,
    ) -> Result<Option<ReviewItem>, ReviewError> {
        let attachment_filename = attachment_filename.map(str::to_string);
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {REVIEW_ITEM_COLUMNS}
                     FROM review_items
                     WHERE source_message_id = ?1
                       AND (attachment_filename = ?2 OR (?2 IS NULL AND attachment_filename IS NULL))
                     ORDER BY created_at DESC
                     LIMIT 1"
                ),
                params![source_message_id, attachment_filename],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_review_item(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_pending(&self) -> Result<Vec<ReviewItem>, ReviewError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {REVIEW_ITEM_COLUMNS}
                     FROM review_items
                     WHERE status = 'pending'
                     ORDER BY created_at"
                ),
                (),
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_review_item(row)?);
        }
        Ok(items)
    }

    /// Move a pending item to its terminal state.
    ///
    /// The UPDATE is conditioned on `status = 'pending'`, so of two
    /// concurrent decisions exactly one sees a row; the loser gets
    /// `AlreadyDecided`.
    pub async fn decide(
        &self,
        id: &str,
        decision: Decision,
        category_id: Option<i64>,
        subcategory_id: Option<i64>,
    ) -> Result<ReviewItem, ReviewError> {
        let now = now_rfc3339();
        let status = decision.terminal_status();

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE review_items
                     SET status = ?2, category_id = ?3, subcategory_id = ?4, decided_at = ?5
                     WHERE id = ?1 AND status = 'pending'
                     RETURNING {REVIEW_ITEM_COLUMNS}"
                ),
                params![id, status.as_str(), category_id, subcategory_id, now],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            return row_to_review_item(row);
        }

        // No row updated: either the item is gone or it is already terminal.
        let existing = self.get_by_id(id).await?;
        Err(ReviewError::AlreadyDecided {
            id: id.to_string(),
            status: existing.status,
        })
    }
}

fn row_to_review_item(row: Row) -> Result<ReviewItem, ReviewError> {
    let extraction_json: String = row.get(8)?;
    let extraction: ExtractionResult = serde_json::from_str(&extraction_json)?;

    let status_raw: String = row.get(11)?;
    let status = ReviewStatus::from_str(&status_raw)
        .ok_or_else(|| ReviewError::InvalidStatus(status_raw.clone()))?;

    Ok(ReviewItem {
        id: row.get(0)?,
        source_message_id: row.get(1)?,
        email_subject: row.get(2)?,
        email_from: row.get(3)?,
        email_date: parse_optional_datetime(row.get(4)?)?,
        attachment_filename: row.get(5)?,
        blob_path: row.get(6)?,
        blob_url: row.get(7)?,
        extraction,
        category_id: row.get(9)?,
        subcategory_id: row.get(10)?,
        status,
        created_at: parse_datetime(row.get(12)?)?,
        decided_at: parse_optional_datetime(row.get(13)?)?,
    })
}

fn parse_datetime(raw: String) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

fn parse_optional_datetime(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    raw.map(parse_datetime).transpose()
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}
