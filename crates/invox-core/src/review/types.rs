use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::ExtractionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Accepted => "accepted",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The human reviewer's verdict on one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accepted => "accepted",
            Decision::Rejected => "rejected",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn terminal_status(&self) -> ReviewStatus {
        match self {
            Decision::Accepted => ReviewStatus::Accepted,
            Decision::Rejected => ReviewStatus::Rejected,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionConflict {
    #[error("review item already decided: {0}")]
    AlreadyDecided(ReviewStatus),
}

/// The only legal transitions are `pending -> accepted` and
/// `pending -> rejected`. A terminal item never moves again.
pub fn apply_decision(
    current: ReviewStatus,
    decision: Decision,
) -> Result<ReviewStatus, DecisionConflict> {
    match current {
        ReviewStatus::Pending => Ok(decision.terminal_status()),
        terminal => Err(DecisionConflict::AlreadyDecided(terminal)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: String,
    pub source_message_id: String,
    pub email_subject: Option<String>,
    pub email_from: Option<String>,
    pub email_date: Option<DateTime<Utc>>,
    pub attachment_filename: Option<String>,
    pub blob_path: Option<String>,
    pub blob_url: Option<String>,
    pub extraction: ExtractionResult,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReviewItem {
    pub source_message_id: String,
    pub email_subject: Option<String>,
    pub email_from: Option<String>,
    pub email_date: Option<DateTime<Utc>>,
    pub attachment_filename: Option<String>,
    pub blob_path: Option<String>,
    pub blob_url: Option<String>,
    pub extraction: ExtractionResult,
}
