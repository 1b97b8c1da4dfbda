use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::extract::{ExtractionResult, ExtractionService};
use crate::mailbox::GmailClient;
use crate::mailbox::types::{AttachmentRef, CandidateMessage};
use crate::review::{NewReviewItem, ReviewError, ReviewItem, ReviewItemRepository};
use crate::storage::{DropboxConnector, StoredDocument};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Review(#[from] ReviewError),
}

/// Message-level fields that travel with every processed item.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    pub message_id: String,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl MessageContext {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            ..Default::default()
        }
    }

    pub fn from_candidate(candidate: &CandidateMessage) -> Self {
        Self {
            message_id: candidate.id.clone(),
            subject: Some(candidate.subject.clone()),
            from: Some(candidate.from.clone()),
            date: candidate.date,
        }
    }
}

/// One unit of batch work: a single attachment or a message body.
#[derive(Debug, Clone)]
pub enum BatchItem {
    Attachment {
        context: MessageContext,
        attachment: AttachmentRef,
    },
    EmailText {
        context: MessageContext,
        body_text: String,
    },
}

/// Expand a candidate into batch items: one per document attachment, or the
/// body text when there are none.
pub fn batch_items(candidate: &CandidateMessage) -> Vec<BatchItem> {
    let context = MessageContext::from_candidate(candidate);
    if candidate.attachments.is_empty() {
        return vec![BatchItem::EmailText {
            context,
            body_text: candidate.body_text.clone(),
        }];
    }

    candidate
        .attachments
        .iter()
        .map(|attachment| BatchItem::Attachment {
            context: context.clone(),
            attachment: attachment.clone(),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ProcessedItem {
    pub review_item: ReviewItem,
    pub stored: Option<StoredDocument>,
    pub extraction: ExtractionResult,
}

/// Chains download, blob upload, structured extraction and review-item
/// creation for one item at a time.
///
/// External failures degrade the item (a `Failure` extraction, a missing
/// stored document) instead of aborting; only repository writes propagate.
pub struct IngestPipeline {
    mail: Arc<GmailClient>,
    storage: Arc<DropboxConnector>,
    extractor: Arc<ExtractionService>,
    reviews: ReviewItemRepository,
    upload_folder: String,
}

impl IngestPipeline {
    pub fn new(
        mail: Arc<GmailClient>,
        storage: Arc<DropboxConnector>,
        extractor: Arc<ExtractionService>,
        reviews: ReviewItemRepository,
        upload_folder: impl Into<String>,
    ) -> Self {
        Self {
            mail,
            storage,
            extractor,
            reviews,
            upload_folder: upload_folder.into(),
        }
    }

    /// Process a batch strictly sequentially: each item's external calls
    /// finish before the next item starts, and every item yields exactly one
    /// pending review item.
    pub async fn process_batch(
        &self,
        items: Vec<BatchItem>,
    ) -> Result<Vec<ProcessedItem>, PipelineError> {
        let mut processed = Vec::with_capacity(items.len());
        for item in items {
            let outcome = match item {
                BatchItem::Attachment {
                    context,
                    attachment,
                } => self.process_attachment(&context, &attachment).await?,
                BatchItem::EmailText { context, body_text } => {
                    self.process_email_text(&context, &body_text).await?
                }
            };
            processed.push(outcome);
        }
        Ok(processed)
    }

    pub async fn process_attachment(
        &self,
        context: &MessageContext,
        attachment: &AttachmentRef,
    ) -> Result<ProcessedItem, PipelineError> {
        info!(
            message_id = %context.message_id,
            filename = %attachment.filename,
            "processing attachment"
        );

        let bytes = match self
            .mail
            .download_attachment(&context.message_id, &attachment.attachment_id)
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    message_id = %context.message_id,
                    filename = %attachment.filename,
                    error = %err,
                    "attachment download failed"
                );
                let extraction = ExtractionResult::failure(err.to_string(), &attachment.filename);
                let review_item = self.store_item(context, Some(attachment), None, &extraction).await?;
                return Ok(ProcessedItem {
                    review_item,
                    stored: None,
                    extraction,
                });
            }
        };

        let stored = match self
            .storage
            .upload(&bytes, &attachment.filename, &self.upload_folder)
            .await
        {
            Ok(stored) => Some(stored),
            Err(err) => {
                warn!(
                    filename = %attachment.filename,
                    error = %err,
                    "blob upload failed; continuing without stored document"
                );
                None
            }
        };

        let extraction = self
            .extractor
            .extract_document(&bytes, &attachment.mime_type, &attachment.filename)
            .await;

        let review_item = self
            .store_item(context, Some(attachment), stored.as_ref(), &extraction)
            .await?;

        Ok(ProcessedItem {
            review_item,
            stored,
            extraction,
        })
    }

    pub async fn process_email_text(
        &self,
        context: &MessageContext,
        body_text: &str,
    ) -> Result<ProcessedItem, PipelineError> {
        info!(message_id = %context.message_id, "processing email text");

        let extraction = self
            .extractor
            .extract_from_email_text(
                body_text,
                context.subject.as_deref().unwrap_or(""),
                context.from.as_deref().unwrap_or(""),
            )
            .await;

        let review_item = self.store_item(context, None, None, &extraction).await?;

        Ok(ProcessedItem {
            review_item,
            stored: None,
            extraction,
        })
    }

    async fn store_item(
        &self,
        context: &MessageContext,
        attachment: Option<&AttachmentRef>,
        stored: Option<&StoredDocument>,
        extraction: &ExtractionResult,
    ) -> Result<ReviewItem, PipelineError> {
        let item = self
            .reviews
            .create(NewReviewItem {
                source_message_id: context.message_id.clone(),
                email_subject: context.subject.clone(),
                email_from: context.from.clone(),
                email_date: context.date,
                attachment_filename: attachment.map(|a| a.filename.clone()),
                blob_path: stored.map(|s| s.path.clone()),
                blob_url: stored.map(|s| s.url.clone()),
                extraction: extraction.clone(),
            })
            .await?;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::db::Database;
    use crate::extract::MockLlmClient;
    use crate::migrations::run_migrations;
    use crate::oauth::store::{ProviderSettings, TokenRepository};
    use crate::oauth::{ClientCredentials, OAuthTokens, Provider, TokenService};
    use crate::review::ReviewStatus;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        pipeline: IngestPipeline,
        llm: MockLlmClient,
        reviews: ReviewItemRepository,
        _dir: TempDir,
    }

    async fn fixture(server: &MockServer) -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("db.sqlite");
        let db = Database::new(&db_path).await.expect("create db");
        run_migrations(&db).await.expect("migrations");

        let repo = TokenRepository::new(db.clone());
        for provider in [Provider::Gmail, Provider::Dropbox] {
            repo.save(
                provider,
                None,
                &OAuthTokens {
                    access_token: "token".into(),
                    refresh_token: "refresh".into(),
                    expires_at: Utc::now() + Duration::hours(1),
                },
            )
            .await
            .expect("seed tokens");
        }

        let settings = ProviderSettings {
            credentials: Some(ClientCredentials {
                client_id: "client".into(),
                client_secret: "secret".into(),
            }),
            redirect_url: "http://localhost/cb".into(),
            auth_endpoint: format!("{}/auth", server.uri()),
            token_endpoint: format!("{}/token", server.uri()),
            static_access_token: None,
        };
        let tokens = Arc::new(TokenService::new(
            reqwest::Client::new(),
            repo,
            settings.clone(),
            settings,
        ));

        let mail = Arc::new(
            GmailClient::new(reqwest::Client::new(), tokens.clone())
                .with_api_base(format!("{}/gmail/v1/users", server.uri())),
        );
        let storage = Arc::new(
            DropboxConnector::new(reqwest::Client::new(), tokens)
                .with_api_base(server.uri())
                .with_content_base(server.uri()),
        );

        let llm = MockLlmClient::new();
        let extractor = Arc::new(ExtractionService::new(
            Arc::new(llm.clone()),
            &ModelConfig {
                provider: "openai".into(),
                model: "gpt-4o".into(),
                temperature: 0.2,
                max_output_tokens: 1000,
            },
        ));

        let reviews = ReviewItemRepository::new(db);
        let pipeline = IngestPipeline::new(
            mail,
            storage,
            extractor,
            reviews.clone(),
            "/Invoices/EmailImports",
        );

        Fixture {
            pipeline,
            llm,
            reviews,
            _dir: dir,
        }
    }

    fn attachment() -> AttachmentRef {
        AttachmentRef {
            filename: "receipt.png".into(),
            mime_type: "image/png".into(),
            attachment_id: "att-1".into(),
            size: 10,
        }
    }

    async fn mount_attachment_download(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1/attachments/att-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "size": 10,
                "data": URL_SAFE_NO_PAD.encode(b"png bytes!"),
            })))
            .mount(server)
            .await;
    }

    async fn mount_storage_ok(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/2/files/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/sharing/create_shared_link_with_settings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "https://www.dropbox.com/s/abc/receipt.png?dl=0",
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn attachment_flows_through_storage_and_extraction() {
        let server = MockServer::start().await;
        mount_attachment_download(&server).await;
        mount_storage_ok(&server).await;

        let fixture = fixture(&server).await;
        fixture
            .llm
            .enqueue_content(json!({"sender": "ACME", "amount": 12.5}).to_string());

        let processed = fixture
            .pipeline
            .process_attachment(&MessageContext::new("m1"), &attachment())
            .await
            .expect("pipeline succeeds");

        let stored = processed.stored.expect("document stored");
        assert_eq!(
            stored.url,
            "https://dl.dropboxusercontent.com/s/abc/receipt.png"
        );
        assert!(processed.extraction.is_success());

        let item = &processed.review_item;
        assert_eq!(item.status, ReviewStatus::Pending);
        assert_eq!(item.source_message_id, "m1");
        assert_eq!(item.attachment_filename.as_deref(), Some("receipt.png"));
        assert_eq!(item.blob_url.as_deref(), Some(stored.url.as_str()));
    }

    #[tokio::test]
    async fn failed_download_still_creates_degraded_review_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1/attachments/att-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fixture = fixture(&server).await;

        let processed = fixture
            .pipeline
            .process_attachment(&MessageContext::new("m1"), &attachment())
            .await
            .expect("pipeline captures the failure");

        assert!(processed.stored.is_none());
        assert!(!processed.extraction.is_success());
        assert_eq!(processed.review_item.status, ReviewStatus::Pending);
        assert_eq!(fixture.llm.call_count(), 0, "no bytes, no model call");
    }

    #[tokio::test]
    async fn failed_upload_degrades_but_extraction_continues() {
        let server = MockServer::start().await;
        mount_attachment_download(&server).await;
        Mock::given(method("POST"))
            .and(path("/2/files/upload"))
            .respond_with(ResponseTemplate::new(507).set_body_string("insufficient_space"))
            .mount(&server)
            .await;

        let fixture = fixture(&server).await;
        fixture
            .llm
            .enqueue_content(json!({"sender": "ACME"}).to_string());

        let processed = fixture
            .pipeline
            .process_attachment(&MessageContext::new("m1"), &attachment())
            .await
            .expect("pipeline captures the failure");

        assert!(processed.stored.is_none());
        assert!(processed.extraction.is_success());
        assert!(processed.review_item.blob_url.is_none());
    }

    #[tokio::test]
    async fn email_text_items_skip_storage() {
        let server = MockServer::start().await;
        let fixture = fixture(&server).await;
        fixture
            .llm
            .enqueue_content(json!({"sender": "ACME", "amount": 9.99}).to_string());

        let context = MessageContext {
            message_id: "m2".into(),
            subject: Some("Invoice".into()),
            from: Some("ACME <billing@acme.example>".into()),
            date: None,
        };
        let processed = fixture
            .pipeline
            .process_email_text(&context, "Please pay 9.99 EUR")
            .await
            .expect("pipeline succeeds");

        assert!(processed.stored.is_none());
        assert!(processed.extraction.is_success());
        assert_eq!(processed.review_item.attachment_filename, None);
        assert_eq!(processed.review_item.email_subject.as_deref(), Some("Invoice"));

        let request = fixture.llm.last_request().expect("model called");
        assert!(request.messages[0].content.contains("Please pay 9.99 EUR"));
    }

    #[tokio::test]
    async fn batch_produces_one_pending_item_per_input() {
        let server = MockServer::start().await;
        mount_attachment_download(&server).await;
        mount_storage_ok(&server).await;

        let fixture = fixture(&server).await;
        fixture
            .llm
            .enqueue_content(json!({"sender": "ACME"}).to_string());
        fixture
            .llm
            .enqueue_content(json!({"sender": "Stripe"}).to_string());

        let items = vec![
            BatchItem::Attachment {
                context: MessageContext::new("m1"),
                attachment: attachment(),
            },
            BatchItem::EmailText {
                context: MessageContext::new("m2"),
                body_text: "receipt for 5 EUR".into(),
            },
        ];

        let processed = fixture
            .pipeline
            .process_batch(items)
            .await
            .expect("batch succeeds");

        assert_eq!(processed.len(), 2);
        assert!(
            processed
                .iter()
                .all(|p| p.review_item.status == ReviewStatus::Pending)
        );

        let pending = fixture.reviews.list_pending().await.expect("list");
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn batch_items_expand_attachments_or_body() {
        let with_attachments = CandidateMessage {
            id: "m1".into(),
            subject: "Invoice".into(),
            from: "a@example.com".into(),
            date: None,
            body_text: "body".into(),
            attachments: vec![attachment(), attachment()],
            has_documents: true,
            is_keyword_match: false,
        };
        assert_eq!(batch_items(&with_attachments).len(), 2);

        let text_only = CandidateMessage {
            attachments: vec![],
            has_documents: false,
            is_keyword_match: true,
            ..with_attachments
        };
        let items = batch_items(&text_only);
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], BatchItem::EmailText { .. }));
    }
}
