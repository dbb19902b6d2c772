//! Wire types for the V2 endpoints
//!
//! Shared by the handlers and by the client-side poller so both ends agree
//! on field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GET install-v2
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstallResponse {
    pub success: bool,
    pub redirect_url: String,
    pub message: String,
}

/// GET callback-v2 on success
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackResponse {
    pub success: bool,
    pub login: String,
    pub message: String,
}

/// GET auth-status-v2
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatusResponse {
    pub user_login: String,
    pub avatar_url: Option<String>,
    pub repo_name: String,
}

/// POST logout-v2
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
}

/// POST workflows-v2 on success
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadWorkflowResponse {
    pub success: bool,
    pub file_name: String,
    pub commit_sha: String,
    pub workflow_run_id: Option<u64>,
    pub workflow_run_url: Option<String>,
}

/// Progress of the register workflow for one uploaded file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RegistrationStatus {
    /// Map a GitHub Actions run status and conclusion
    pub fn from_run(status: Option<&str>, conclusion: Option<&str>) -> Self {
        match status {
            Some("completed") => match conclusion {
                Some("success") => Self::Success,
                _ => Self::Failed,
            },
            Some("in_progress") => Self::Running,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// GET workflows-v2?filename=
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDescriptor {
    pub file_name: String,
    pub status: RegistrationStatus,
    pub workflow_run_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
