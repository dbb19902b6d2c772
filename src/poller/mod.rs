//! Client-side upload and registration poller
//!
//! Uploads a workflow file through `workflows-v2`, then polls its
//! registration run every 3 s until it succeeds, fails, or 5 minutes pass.
//!
//! - `state`: observable snapshot types
//! - `machine`: timer-free state machine with a single `tick` transition
//! - `driver`: tokio task owning one machine, published over a watch channel
//! - `client`: the HTTP seam the driver talks to

pub mod client;
mod driver;
pub mod machine;
pub mod state;

pub use client::{ApiError, HttpWorkflowsApi, WorkflowsApi};
pub use driver::PollerHandle;
pub use machine::{POLL_INTERVAL, POLL_TIMEOUT, PollerError, RegistrationPoller, Step};
pub use state::{RegistrationPhase, UploadStatus, UploadWorkflowState, UploadedWorkflow};
