//! Service layer
//!
//! Business logic separated from HTTP handlers.
//! Services orchestrate the OAuth exchange, installation matching and
//! GitHub App repository operations.

mod callback;
mod workflow;

pub use callback::{CallbackOrchestrator, CallbackOutcome, RejectReason};
pub use workflow::{WorkflowService, describe_run, select_run, validate_workflow_file};
