//! GitHub App authentication and repository operations
//!
//! The app authenticates as itself with a short-lived RS256 JWT, trades it
//! for an installation access token, and uses that token to commit workflow
//! files to the user's fork and dispatch the register workflow.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use thiserror::Error;

use super::{GITHUB_API_VERSION, GITHUB_JSON};

/// GitHub allows app JWTs to live at most 10 minutes
const APP_JWT_LIFETIME_SECS: i64 = 9 * 60;
/// Backdate `iat` to tolerate clock drift
const APP_JWT_BACKDATE_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum GitHubAppError {
    #[error("app JWT could not be created: {0}")]
    Jwt(String),
    #[error("request to GitHub failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("GitHub API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected response from GitHub: {0}")]
    InvalidResponse(String),
}

/// Installation access token
#[derive(Clone, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A run of a GitHub Actions workflow
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub html_url: String,
    /// queued, in_progress, completed, waiting, requested, pending
    pub status: Option<String>,
    /// success, failure, cancelled, ... once completed
    pub conclusion: Option<String>,
    #[serde(default)]
    pub display_title: String,
    pub event: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsPage {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Commit request for one file
#[derive(Debug, Clone)]
pub struct FileCommit<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
    pub path: &'a str,
    pub branch: &'a str,
    pub message: &'a str,
    pub content: &'a [u8],
    /// Blob sha of the file being replaced, if it exists
    pub previous_sha: Option<&'a str>,
}

/// GitHub App client
#[derive(Clone)]
pub struct GitHubAppClient {
    http: reqwest::Client,
    app_id: u64,
    private_key_pem: String,
    api_url: String,
}

impl GitHubAppClient {
    pub fn new(http: reqwest::Client, config: &crate::config::GitHubConfig) -> Self {
        Self {
            http,
            app_id: config.app_id,
            private_key_pem: config.private_key.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create an RS256 JWT identifying the app, valid for nine minutes
    pub fn app_jwt(&self, now: i64) -> Result<String, GitHubAppError> {
        use rsa::pkcs1::DecodeRsaPrivateKey;
        use rsa::pkcs8::DecodePrivateKey;
        use rsa::signature::{SignatureEncoding, Signer};

        // GitHub issues PKCS#1 keys; accept PKCS#8 too
        let private_key = RsaPrivateKey::from_pkcs1_pem(&self.private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&self.private_key_pem))
            .map_err(|e| GitHubAppError::Jwt(format!("invalid RSA private key: {e}")))?;

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let claims = serde_json::to_vec(&AppClaims {
            iat: now - APP_JWT_BACKDATE_SECS,
            exp: now + APP_JWT_LIFETIME_SECS,
            iss: self.app_id.to_string(),
        })
        .map_err(|e| GitHubAppError::Jwt(e.to_string()))?;
        let signing_input = format!("{header}.{}", URL_SAFE_NO_PAD.encode(claims));

        let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key);
        let signature = signing_key
            .try_sign(signing_input.as_bytes())
            .map_err(|e| GitHubAppError::Jwt(format!("signing failed: {e}")))?;

        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    /// Mint an access token scoped to one installation
    #[tracing::instrument(skip(self))]
    pub async fn installation_token(
        &self,
        installation_id: &str,
    ) -> Result<InstallationToken, GitHubAppError> {
        let jwt = self.app_jwt(Utc::now().timestamp())?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url,
            urlencoding::encode(installation_id)
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header(ACCEPT, GITHUB_JSON)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .await?;

        parse_json(response).await
    }

    /// Blob sha of a file on a branch, or `None` if it does not exist
    #[tracing::instrument(skip(self, token))]
    pub async fn file_sha(
        &self,
        token: &InstallationToken,
        owner: &str,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<String>, GitHubAppError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/contents/{}",
            self.api_url,
            encode_path(path)
        );
        let response = self
            .authorized(self.http.get(&url), token)
            .query(&[("ref", branch)])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let entry: ContentsEntry = parse_json(response).await?;
        Ok(Some(entry.sha))
    }

    /// Create or replace a file; returns the commit sha
    #[tracing::instrument(
        skip(self, token, commit),
        fields(owner = commit.owner, repo = commit.repo, path = commit.path)
    )]
    pub async fn put_file(
        &self,
        token: &InstallationToken,
        commit: FileCommit<'_>,
    ) -> Result<String, GitHubAppError> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url,
            commit.owner,
            commit.repo,
            encode_path(commit.path)
        );

        let mut body = serde_json::json!({
            "message": commit.message,
            "content": BASE64.encode(commit.content),
            "branch": commit.branch,
        });
        if let Some(sha) = commit.previous_sha {
            body["sha"] = serde_json::Value::String(sha.to_string());
        }

        let response = self
            .authorized(self.http.put(&url), token)
            .json(&body)
            .send()
            .await?;

        let created: PutContentsResponse = parse_json(response).await?;
        Ok(created.commit.sha)
    }

    /// Trigger a `workflow_dispatch` run
    #[tracing::instrument(skip(self, token, inputs))]
    pub async fn dispatch_workflow(
        &self,
        token: &InstallationToken,
        owner: &str,
        repo: &str,
        workflow: &str,
        git_ref: &str,
        inputs: serde_json::Value,
    ) -> Result<(), GitHubAppError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/actions/workflows/{}/dispatches",
            self.api_url,
            urlencoding::encode(workflow)
        );

        let response = self
            .authorized(self.http.post(&url), token)
            .json(&serde_json::json!({ "ref": git_ref, "inputs": inputs }))
            .send()
            .await?;

        ensure_success(response).await.map(|_| ())
    }

    /// Recent `workflow_dispatch` runs of a workflow, newest first
    #[tracing::instrument(skip(self, token))]
    pub async fn list_dispatch_runs(
        &self,
        token: &InstallationToken,
        owner: &str,
        repo: &str,
        workflow: &str,
    ) -> Result<Vec<WorkflowRun>, GitHubAppError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/actions/workflows/{}/runs",
            self.api_url,
            urlencoding::encode(workflow)
        );

        let response = self
            .authorized(self.http.get(&url), token)
            .query(&[("event", "workflow_dispatch"), ("per_page", "30")])
            .send()
            .await?;

        let page: WorkflowRunsPage = parse_json(response).await?;
        Ok(page.workflow_runs)
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        token: &InstallationToken,
    ) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&token.token)
            .header(ACCEPT, GITHUB_JSON)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }
}

/// Percent-encode each path segment, keeping the separators
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GitHubAppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ApiErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

    tracing::warn!(status = status.as_u16(), %message, "GitHub API request failed");
    Err(GitHubAppError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn parse_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GitHubAppError> {
    ensure_success(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| GitHubAppError::InvalidResponse(e.to_string()))
}
