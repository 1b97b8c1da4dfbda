pub mod config;
pub mod db;
pub mod document;
pub mod extract;
pub mod mailbox;
pub mod migrations;
pub mod oauth;
pub mod pipeline;
pub mod retry;
pub mod review;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use db::Database;
pub use extract::{ExtractionResult, ExtractionService, GenaiLlmClient, InvoiceData, LlmClient};
pub use mailbox::{CandidateFinder, GmailClient};
pub use oauth::{Provider, TokenRepository, TokenService};
pub use pipeline::{BatchItem, IngestPipeline, MessageContext, batch_items};
pub use review::{
    AuditRepository, Decision, LibsqlLedgerWriter, ReviewItemRepository, ReviewWorkflow,
};
pub use storage::DropboxConnector;
pub use telemetry::{TelemetryError, TelemetryGuard, init_telemetry};
