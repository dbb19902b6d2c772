//! Workflow upload and registration status
//!
//! Commits an uploaded workflow file to the session's fork, dispatches the
//! register workflow, and resolves registration progress from its runs.

use chrono::{DateTime, Duration, Utc};

use crate::api::{RegistrationDescriptor, RegistrationStatus, UploadWorkflowResponse};
use crate::auth::Session;
use crate::config::GitHubConfig;
use crate::error::AppError;
use crate::github::{FileCommit, GitHubAppClient, WorkflowRun};
use crate::metrics::{WORKFLOW_UPLOAD_BYTES, WORKFLOW_UPLOADS_TOTAL};

/// Tolerated clock skew between this server and GitHub when matching runs
const RUN_MATCH_SKEW_SECS: i64 = 60;

/// Check an uploaded workflow file and return its normalized name
///
/// The name must be a bare `.json` file name and the content a non-empty
/// JSON object no larger than `max_bytes`.
pub fn validate_workflow_file(
    file_name: &str,
    content: &[u8],
    max_bytes: usize,
) -> Result<String, AppError> {
    let name = file_name.trim();

    if name.is_empty() {
        return Err(AppError::InvalidFile("File name is required".to_string()));
    }
    if name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(AppError::InvalidFile(format!(
            "Invalid file name '{name}'"
        )));
    }
    if !name.to_ascii_lowercase().ends_with(".json") {
        return Err(AppError::InvalidFile(
            "Workflow files must have a .json extension".to_string(),
        ));
    }
    if content.is_empty() {
        return Err(AppError::InvalidFile("Workflow file is empty".to_string()));
    }
    if content.len() > max_bytes {
        return Err(AppError::InvalidFile(format!(
            "Workflow file exceeds {max_bytes} bytes"
        )));
    }

    match serde_json::from_slice::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(_)) => Ok(name.to_string()),
        Ok(_) => Err(AppError::InvalidFile(
            "Workflow file must contain a JSON object".to_string(),
        )),
        Err(error) => Err(AppError::InvalidFile(format!(
            "Workflow file is not valid JSON: {error}"
        ))),
    }
}

/// Newest run whose title names the file, optionally not older than `since`
pub fn select_run<'r>(
    runs: &'r [WorkflowRun],
    file_name: &str,
    since: Option<DateTime<Utc>>,
) -> Option<&'r WorkflowRun> {
    let earliest = since.map(|since| since - Duration::seconds(RUN_MATCH_SKEW_SECS));

    runs.iter()
        .filter(|run| names_file(&run.display_title, file_name))
        .filter(|run| earliest.is_none_or(|earliest| run.created_at >= earliest))
        .max_by_key(|run| run.created_at)
}

/// True if `title` contains `file_name` as a whole word
///
/// "Register data.json" does not name "a.json".
fn names_file(title: &str, file_name: &str) -> bool {
    let is_name_char = |c: char| c.is_alphanumeric() || matches!(c, '-' | '_' | '.');

    !file_name.is_empty()
        && title.match_indices(file_name).any(|(start, matched)| {
            let before = title[..start].chars().next_back();
            let after = title[start + matched.len()..].chars().next();
            !before.is_some_and(is_name_char) && !after.is_some_and(is_name_char)
        })
}

/// Describe a run as registration progress
pub fn describe_run(file_name: &str, run: &WorkflowRun) -> RegistrationDescriptor {
    let status = RegistrationStatus::from_run(run.status.as_deref(), run.conclusion.as_deref());
    let error_message = (status == RegistrationStatus::Failed).then(|| {
        format!(
            "Registration workflow concluded with '{}'",
            run.conclusion.as_deref().unwrap_or("unknown")
        )
    });

    RegistrationDescriptor {
        file_name: file_name.to_string(),
        status,
        workflow_run_url: Some(run.html_url.clone()),
        error_message,
        triggered_at: Some(run.created_at),
        completed_at: status.is_terminal().then_some(run.updated_at),
    }
}

/// Workflow operations on behalf of one session
pub struct WorkflowService<'a> {
    app: &'a GitHubAppClient,
    config: &'a GitHubConfig,
    max_file_bytes: usize,
}

impl<'a> WorkflowService<'a> {
    pub fn new(app: &'a GitHubAppClient, config: &'a GitHubConfig, max_file_bytes: usize) -> Self {
        Self {
            app,
            config,
            max_file_bytes,
        }
    }

    fn target_path(&self, file_name: &str) -> String {
        let dir = self.config.workflow_dir.trim_matches('/');
        if dir.is_empty() {
            file_name.to_string()
        } else {
            format!("{dir}/{file_name}")
        }
    }

    /// Commit the file to the fork and trigger registration
    pub async fn upload(
        &self,
        session: &Session,
        file_name: &str,
        content: &[u8],
    ) -> Result<UploadWorkflowResponse, AppError> {
        let name = validate_workflow_file(file_name, content, self.max_file_bytes)
            .inspect_err(|_| WORKFLOW_UPLOADS_TOTAL.with_label_values(&["invalid"]).inc())?;

        let result = self.commit_and_dispatch(session, &name, content).await;
        let label = if result.is_ok() { "committed" } else { "failed" };
        WORKFLOW_UPLOADS_TOTAL.with_label_values(&[label]).inc();
        result
    }

    async fn commit_and_dispatch(
        &self,
        session: &Session,
        name: &str,
        content: &[u8],
    ) -> Result<UploadWorkflowResponse, AppError> {
        let owner = session.gh_user_login.as_str();
        let repo = session.gh_repo_name.as_str();
        let branch = self.config.default_branch.as_str();
        let path = self.target_path(name);

        let token = self.app.installation_token(&session.installation_id).await?;

        let previous_sha = self.app.file_sha(&token, owner, repo, &path, branch).await?;
        let message = if previous_sha.is_some() {
            format!("Update workflow {name}")
        } else {
            format!("Add workflow {name}")
        };

        let commit_sha = self
            .app
            .put_file(
                &token,
                FileCommit {
                    owner,
                    repo,
                    path: &path,
                    branch,
                    message: &message,
                    content,
                    previous_sha: previous_sha.as_deref(),
                },
            )
            .await?;
        WORKFLOW_UPLOAD_BYTES.inc_by(content.len() as u64);

        let triggered_at = Utc::now();
        self.app
            .dispatch_workflow(
                &token,
                owner,
                repo,
                &self.config.register_workflow,
                branch,
                serde_json::json!({ "workflow_file": name }),
            )
            .await?;

        tracing::info!(
            owner,
            repo,
            file = %name,
            commit = %commit_sha,
            "Workflow committed and registration dispatched"
        );

        // GitHub creates dispatch runs asynchronously; the run may not exist yet
        let run = match self
            .app
            .list_dispatch_runs(&token, owner, repo, &self.config.register_workflow)
            .await
        {
            Ok(runs) => select_run(&runs, name, Some(triggered_at)).cloned(),
            Err(error) => {
                tracing::warn!(%error, "Looking up the registration run failed");
                None
            }
        };

        Ok(UploadWorkflowResponse {
            success: true,
            file_name: name.to_string(),
            commit_sha,
            workflow_run_id: run.as_ref().map(|run| run.id),
            workflow_run_url: run.map(|run| run.html_url),
        })
    }

    /// Current registration progress for a previously uploaded file
    ///
    /// # Errors
    /// `AppError::NotFound` while no matching run exists.
    pub async fn registration_status(
        &self,
        session: &Session,
        file_name: &str,
    ) -> Result<RegistrationDescriptor, AppError> {
        let name = file_name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("filename is required".to_string()));
        }

        let token = self.app.installation_token(&session.installation_id).await?;
        let runs = self
            .app
            .list_dispatch_runs(
                &token,
                &session.gh_user_login,
                &session.gh_repo_name,
                &self.config.register_workflow,
            )
            .await?;

        let run = select_run(&runs, name, None).ok_or_else(|| {
            AppError::NotFound(format!("No registration run found for {name} yet"))
        })?;

        Ok(describe_run(name, run))
    }
}
