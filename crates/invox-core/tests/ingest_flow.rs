//! End-to-end flow against HTTP doubles: candidate discovery, attachment
//! processing through blob storage and extraction, and the accept/reject
//! decision paths with their audit trail.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param_contains};
use wiremock::{Mock, MockServer, ResponseTemplate};

use invox_core::config::ModelConfig;
use invox_core::extract::{ExtractionService, InvoiceData, MockLlmClient};
use invox_core::mailbox::{CandidateFinder, GmailClient};
use invox_core::migrations::run_migrations;
use invox_core::oauth::store::ProviderSettings;
use invox_core::oauth::{ClientCredentials, OAuthTokens, Provider, TokenRepository, TokenService};
use invox_core::pipeline::{IngestPipeline, batch_items};
use invox_core::review::{
    AuditRepository, Decision, DecisionRequest, LibsqlLedgerWriter, ReviewError,
    ReviewItemRepository, ReviewStatus, ReviewWorkflow, WorkflowError,
};
use invox_core::storage::DropboxConnector;
use invox_core::{Database, ExtractionResult};

struct Harness {
    finder: CandidateFinder,
    pipeline: IngestPipeline,
    workflow: ReviewWorkflow,
    reviews: ReviewItemRepository,
    audit: AuditRepository,
    ledger: LibsqlLedgerWriter,
    llm: MockLlmClient,
    _dir: TempDir,
}

async fn harness(server: &MockServer) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let db_name = format!("db_{}.sqlite", uuid_suffix());
    let db_path = dir.path().join(db_name);
    let db = Database::new(&db_path).await.expect("create db");
    run_migrations(&db).await.expect("migrations");

    let repo = TokenRepository::new(db.clone());
    for provider in [Provider::Gmail, Provider::Dropbox] {
        repo.save(
            provider,
            Some("user@example.com"),
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

    let reviews = ReviewItemRepository::new(db.clone());
    let audit = AuditRepository::new(db.clone());
    let ledger = LibsqlLedgerWriter::new(db);

    Harness {
        finder: CandidateFinder::new(mail.clone()),
        pipeline: IngestPipeline::new(
            mail,
            storage,
            extractor,
            reviews.clone(),
            "/Invoices/EmailImports",
        ),
        workflow: ReviewWorkflow::new(
            reviews.clone(),
            audit.clone(),
            Arc::new(ledger.clone()),
        ),
        reviews,
        audit,
        ledger,
        llm,
        _dir: dir,
    }
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn message_response(id: &str, from: &str, subject: &str, with_attachment: bool) -> serde_json::Value {
    let body = URL_SAFE_NO_PAD.encode("Invoice Total: 123.45 EUR, from ACME Ltd, date 2024-03-02");
    let mut parts = vec![json!({
        "mimeType": "text/plain",
        "body": { "size": 57, "data": body }
    })];
    if with_attachment {
        parts.push(json!({
            "mimeType": "application/pdf",
            "filename": "invoice.pdf",
            "body": { "size": 100, "attachmentId": "att-1" }
        }));
    }

    json!({
        "id": id,
        "labelIds": ["INBOX"],
        "internalDate": "1709370000000",
        "payload": {
            "mimeType": "multipart/mixed",
            "headers": [
                { "name": "From", "value": from },
                { "name": "Subject", "value": subject },
                { "name": "Date", "value": "Sat, 2 Mar 2024 09:00:00 +0000" }
            ],
            "parts": parts
        }
    })
}

async fn mount_search_results(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .and(query_param_contains("q", "has:attachment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [ { "id": "m1" } ],
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .and(query_param_contains("q", "subject:("))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [ { "id": "m1" }, { "id": "m2" }, { "id": "m3" } ],
        })))
        .mount(server)
        .await;

    for (id, from, with_attachment) in [
        ("m1", "ACME Ltd <billing@acme.example>", true),
        ("m2", "Stripe <receipts@stripe.com>", false),
        (
            "m3",
            "Mail Delivery Subsystem <mailer-daemon@googlemail.com>",
            false,
        ),
    ] {
        Mock::given(method("GET"))
            .and(path(format!("/gmail/v1/users/me/messages/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(message_response(
                id,
                from,
                "Invoice 42",
                with_attachment,
            )))
            .mount(server)
            .await;
    }
}

async fn mount_attachment_and_storage(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/m1/attachments/att-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "size": 10,
            "data": URL_SAFE_NO_PAD.encode(b"not really a pdf"),
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/files/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/sharing/create_shared_link_with_settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://www.dropbox.com/s/abc/invoice.pdf?dl=0",
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn discovery_filters_and_tags_candidates() {
    let server = MockServer::start().await;
    mount_search_results(&server).await;

    let harness = harness(&server).await;
    let candidates = harness
        .finder
        .find_candidates(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            10,
        )
        .await
        .expect("discovery succeeds");

    let ids: Vec<_> = candidates.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"], "dedup keeps m1 once, denylist drops m3");
    assert!(candidates[0].has_documents);
    assert!(candidates[1].is_keyword_match);
    assert!(candidates[1].body_text.contains("Invoice Total: 123.45 EUR"));
}

#[tokio::test]
async fn batch_processing_creates_pending_items_then_decisions_settle_them() {
    let server = MockServer::start().await;
    mount_search_results(&server).await;
    mount_attachment_and_storage(&server).await;

    let harness = harness(&server).await;

    // m1's PDF bytes are unreadable, so its extraction degrades to a failure;
    // m2's body text goes through the model.
    harness.llm.enqueue_content(
        json!({
            "sender": "ACME Ltd",
            "amount": 123.45,
            "currency": "EUR",
            "date": "2024-03-02",
            "isInvoice": true,
        })
        .to_string(),
    );

    let candidates = harness
        .finder
        .find_candidates(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            10,
        )
        .await
        .expect("discovery succeeds");

    let items: Vec<_> = candidates.iter().flat_map(batch_items).collect();
    assert_eq!(items.len(), 2);

    let processed = harness
        .pipeline
        .process_batch(items)
        .await
        .expect("batch succeeds");

    assert_eq!(processed.len(), 2, "one review item per selected input");
    assert!(
        processed
            .iter()
            .all(|p| p.review_item.status == ReviewStatus::Pending)
    );

    // The attachment item kept its stored document even though extraction failed.
    let attachment_item = &processed[0];
    assert!(!attachment_item.extraction.is_success());
    assert_eq!(
        attachment_item.review_item.blob_url.as_deref(),
        Some("https://dl.dropboxusercontent.com/s/abc/invoice.pdf")
    );

    // The text item extracted successfully.
    let text_item = &processed[1];
    match &text_item.extraction {
        ExtractionResult::Success { data, .. } => {
            assert_eq!(data.sender.as_deref(), Some("ACME Ltd"));
            assert_eq!(data.amount, Some(123.45));
            assert_eq!(data.currency, "EUR");
            assert_eq!(data.date.as_deref(), Some("2024-03-02"));
            assert!(data.is_invoice);
        }
        other => panic!("expected success, got {other:?}"),
    }

    // Accept the attachment item; the ledger entry and audit record appear.
    let accept = DecisionRequest {
        message_id: "m1".into(),
        subject: Some("Invoice 42".into()),
        sender: Some("ACME Ltd <billing@acme.example>".into()),
        message_date: None,
        attachment_filename: Some("invoice.pdf".into()),
        blob_url: attachment_item.review_item.blob_url.clone(),
        email_text: None,
        extracted: InvoiceData {
            sender: Some("ACME Ltd".into()),
            amount: Some(123.45),
            currency: "EUR".into(),
            date: Some("2024-03-02".into()),
            description: None,
            invoice_number: None,
            is_invoice: true,
        },
        category_id: Some(3),
        subcategory_id: None,
    };
    let outcome = harness
        .workflow
        .accept(accept.clone())
        .await
        .expect("accept succeeds");

    let entry = harness
        .ledger
        .get_by_id(&outcome.expense_id)
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(entry.amount, 123.45);
    assert_eq!(entry.input_type, "email");

    // A second decision on the same item must not create more records.
    let err = harness
        .workflow
        .reject(accept)
        .await
        .expect_err("second decision fails");
    assert!(matches!(
        err,
        WorkflowError::Review(ReviewError::AlreadyDecided { .. })
    ));

    // Reject the text item.
    let reject = DecisionRequest {
        message_id: "m2".into(),
        subject: Some("Invoice 42".into()),
        sender: Some("Stripe <receipts@stripe.com>".into()),
        message_date: None,
        attachment_filename: None,
        blob_url: None,
        email_text: Some("Invoice Total: 123.45 EUR".into()),
        extracted: InvoiceData {
            sender: Some("X".into()),
            amount: Some(10.0),
            currency: "EUR".into(),
            date: None,
            description: None,
            invoice_number: None,
            is_invoice: true,
        },
        category_id: None,
        subcategory_id: None,
    };
    let record = harness.workflow.reject(reject).await.expect("reject succeeds");
    assert_eq!(record.decision, Decision::Rejected);
    assert!(record.linked_expense_id.is_none());

    // Exactly one ledger entry and two audit records, newest first.
    assert_eq!(harness.ledger.count().await.expect("count"), 1);
    let audit = harness.audit.list_recent().await.expect("list");
    assert_eq!(audit.len(), 2);
    assert!(audit.iter().any(|r| r.decision == Decision::Accepted));
    assert!(audit.iter().any(|r| r.decision == Decision::Rejected));

    // No pending items remain.
    assert!(harness.reviews.list_pending().await.expect("list").is_empty());
}
