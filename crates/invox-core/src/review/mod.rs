pub mod audit;
pub mod ledger;
pub mod repository;
pub mod types;
pub mod workflow;

pub use audit::{AuditError, AuditRecord, AuditRepository, NewAuditRecord};
pub use ledger::{LedgerEntry, LedgerError, LedgerWriter, LibsqlLedgerWriter, NewLedgerEntry};
pub use repository::{ReviewError, ReviewItemRepository};
pub use types::{
    Decision, DecisionConflict, NewReviewItem, ReviewItem, ReviewStatus, apply_decision,
};
pub use workflow::{AcceptOutcome, DecisionRequest, ReviewWorkflow, WorkflowError};
