use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::mailbox::attachments::collect_attachments;
use crate::mailbox::client::{GmailClient, MailboxError};
use crate::mailbox::parser;
use crate::mailbox::types::CandidateMessage;

/// Senders whose mail never reaches the review queue (bounces, DMARC
/// reports, account notices). Matched case-insensitively as substrings.
pub const IGNORED_SENDERS: &[&str] = &[
    "mailer-daemon@googlemail.com",
    "mailer-daemon@google.com",
    "noreply-dmarc-support@google.com",
    "no-reply@accounts.google.com",
    "info@jvkpro.com",
];

/// Invoice-related subject vocabulary, multiple languages plus payment
/// services and known supplier names.
pub const INVOICE_KEYWORDS: &[&str] = &[
    // English
    "invoice",
    "bill",
    "billing",
    "receipt",
    "payment",
    "subscription",
    "your order",
    "order confirmation",
    "payment confirmation",
    // Latvian
    "rēķins",
    "maksājums",
    "apmaksa",
    "kvīts",
    "pasūtījums",
    // Russian
    "счет",
    "счёт",
    "оплата",
    "квитанция",
    "платеж",
    "платёж",
    "чек",
    // German
    "rechnung",
    "zahlung",
    "quittung",
    // Common services
    "stripe",
    "paypal",
    "wise",
    "revolut",
    // Known suppliers
    "BITE",
    "LMT",
    "VENDEN",
    "GOOGLE CLOUD",
    "GRIFS",
    "SENSON AUTO",
    "INTER CARS",
    "AMAZON",
    "LINDSTROM",
    "APE MOTORS",
    "CERTEX",
    "NESTE",
];

/// Discovers candidate messages: runs the attachment and keyword searches,
/// merges and deduplicates the hits, fetches full messages, and filters out
/// ignored senders.
pub struct CandidateFinder {
    client: Arc<GmailClient>,
}

impl CandidateFinder {
    pub fn new(client: Arc<GmailClient>) -> Self {
        Self { client }
    }

    pub async fn find_candidates(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        max_results: u32,
    ) -> Result<Vec<CandidateMessage>, MailboxError> {
        let range = date_range_query(start_date, end_date);
        let queries = [attachment_query(&range), keyword_query(&range)];
        let per_query = (max_results / 2).max(1);

        let mut seen = HashSet::new();
        let mut message_ids = Vec::new();
        for query in &queries {
            debug!(query = %truncate_for_log(query), "mailbox search");
            match self.client.list_messages(query, per_query).await {
                Ok(response) => {
                    for stub in response.messages {
                        if seen.insert(stub.id.clone()) {
                            message_ids.push(stub.id);
                        }
                    }
                }
                Err(err) => {
                    // One failed search should not starve the other.
                    warn!(error = %err, "mailbox search query failed");
                }
            }
        }
        message_ids.truncate(max_results as usize);

        let mut candidates = Vec::new();
        for message_id in message_ids {
            let message = self.client.get_message(&message_id).await?;

            let from = parser::sender(&message);
            if is_ignored_sender(&from) {
                debug!(%from, "dropping ignored sender");
                continue;
            }

            let attachments = message
                .payload
                .as_ref()
                .map(collect_attachments)
                .unwrap_or_default();
            let body_text = message
                .payload
                .as_ref()
                .map(parser::extract_body_text)
                .unwrap_or_default();
            let has_documents = !attachments.is_empty();

            candidates.push(CandidateMessage {
                id: message.id.clone(),
                subject: parser::subject(&message),
                date: parser::message_date(&message),
                from,
                body_text,
                is_keyword_match: !has_documents,
                has_documents,
                attachments,
            });
        }

        Ok(candidates)
    }
}

pub fn is_ignored_sender(from: &str) -> bool {
    let lower = from.to_lowercase();
    IGNORED_SENDERS
        .iter()
        .any(|ignored| lower.contains(&ignored.to_lowercase()))
}

fn date_range_query(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "after:{} before:{}",
        start.format("%Y/%m/%d"),
        end.format("%Y/%m/%d")
    )
}

fn attachment_query(range: &str) -> String {
    format!(
        "{range} has:attachment (filename:pdf OR filename:doc OR filename:docx OR filename:xls OR filename:xlsx)"
    )
}

fn keyword_query(range: &str) -> String {
    let keywords = INVOICE_KEYWORDS
        .iter()
        .map(|k| format!("\"{k}\""))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!("{range} subject:({keywords})")
}

fn truncate_for_log(query: &str) -> String {
    parser::truncate_chars(query, 100)
}
