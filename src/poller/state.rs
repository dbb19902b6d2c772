//! Observable upload and registration state

use serde::{Deserialize, Serialize};

use crate::api::{RegistrationDescriptor, UploadWorkflowResponse};

/// Upload phase
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    #[default]
    Idle,
    Uploading,
    Uploaded,
    Error,
}

/// Registration phase
///
/// Only reaches `Polling` after the upload reached `Uploaded`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationPhase {
    #[default]
    Idle,
    Polling,
    Success,
    Failed,
    Error,
}

impl RegistrationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Error)
    }
}

/// File committed by a successful upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedWorkflow {
    pub file_name: String,
    pub commit_sha: String,
    pub workflow_run_id: Option<u64>,
    pub workflow_run_url: Option<String>,
}

impl From<UploadWorkflowResponse> for UploadedWorkflow {
    fn from(response: UploadWorkflowResponse) -> Self {
        Self {
            file_name: response.file_name,
            commit_sha: response.commit_sha,
            workflow_run_id: response.workflow_run_id,
            workflow_run_url: response.workflow_run_url,
        }
    }
}

/// Snapshot of one poller instance
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadWorkflowState {
    pub upload_status: UploadStatus,
    pub registration_status: RegistrationPhase,
    pub uploaded_file: Option<UploadedWorkflow>,
    pub registration: Option<RegistrationDescriptor>,
    /// User-visible failure (upload error, failed run, or timeout)
    pub error_message: Option<String>,
}

impl UploadWorkflowState {
    /// True while an upload or a poll loop is in progress
    pub fn is_active(&self) -> bool {
        self.upload_status == UploadStatus::Uploading
            || self.registration_status == RegistrationPhase::Polling
    }
}
