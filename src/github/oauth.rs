//! GitHub OAuth code exchange and installation discovery
//!
//! Implements the user-to-server half of the GitHub App flow:
//! 1. Exchange the one-time authorization code for a user access token
//! 2. Fetch the authenticated user
//! 3. Enumerate the user's installations of this app, with repositories
//!
//! Nothing here is retried: authorization codes are single-use.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::installation::{Installation, InstallationRepository, Permissions};
use super::{GITHUB_API_VERSION, GITHUB_JSON};

const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 10;

/// Errors from the OAuth exchange and user-scoped API calls
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// The code was rejected (expired, unknown, or already used)
    #[error("authorization code is invalid or has already been used")]
    CodeInvalid,
    /// Transport failure or non-2xx response
    #[error("GitHub request failed{}", status_suffix(.status))]
    Upstream { status: Option<u16> },
    /// A 2xx response whose body was not what GitHub documents
    #[error("unexpected response from GitHub: {0}")]
    InvalidResponse(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|status| format!(" with status {status}"))
        .unwrap_or_default()
}

/// User access token
///
/// Never logged; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Authenticated GitHub user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub id: u64,
    pub avatar_url: Option<String>,
}

/// User-scoped GitHub operations used by the OAuth callback
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitHubOAuth: Send + Sync {
    /// Exchange a one-time authorization code for a user access token
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, ExchangeError>;

    /// Fetch the user the token belongs to
    async fn get_user(&self, token: &AccessToken) -> Result<GitHubUser, ExchangeError>;

    /// List this app's installations visible to the user, in API order
    async fn list_installations(
        &self,
        token: &AccessToken,
    ) -> Result<Vec<Installation>, ExchangeError>;
}

/// Token endpoint response
///
/// GitHub answers 200 for both outcomes; failures carry `error`.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstallationsPage {
    total_count: usize,
    installations: Vec<ApiInstallation>,
}

#[derive(Debug, Deserialize)]
struct ApiInstallation {
    id: u64,
    account: Option<ApiAccount>,
    #[serde(default)]
    permissions: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ApiAccount {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepositoriesPage {
    total_count: usize,
    repositories: Vec<ApiRepository>,
}

#[derive(Debug, Deserialize)]
struct ApiRepository {
    name: String,
    full_name: String,
    #[serde(default)]
    fork: bool,
}

#[derive(Debug, Deserialize)]
struct ApiRepositoryDetail {
    parent: Option<ApiParent>,
}

#[derive(Debug, Deserialize)]
struct ApiParent {
    full_name: String,
}

/// reqwest-backed GitHub OAuth client
#[derive(Clone)]
pub struct GitHubOAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    api_url: String,
    web_url: String,
}

impl GitHubOAuthClient {
    pub fn new(http: reqwest::Client, config: &crate::config::GitHubConfig) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            web_url: config.web_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &AccessToken,
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.api_url, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.expose())
            .header(ACCEPT, GITHUB_JSON)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .await
            .map_err(|error| {
                tracing::warn!(%error, path, "GitHub request failed");
                ExchangeError::Upstream { status: None }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), path, "GitHub returned an error status");
            return Err(ExchangeError::Upstream {
                status: Some(status.as_u16()),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|error| ExchangeError::InvalidResponse(error.to_string()))
    }

    async fn list_repositories(
        &self,
        installation_id: u64,
        token: &AccessToken,
    ) -> Result<Vec<InstallationRepository>, ExchangeError> {
        let mut repositories = Vec::new();

        for page in 1..=MAX_PAGES {
            let path = format!(
                "/user/installations/{installation_id}/repositories?per_page={PER_PAGE}&page={page}"
            );
            let body: RepositoriesPage = self.get_json(&path, token).await?;
            let received = body.repositories.len();
            repositories.extend(body.repositories);

            if received < PER_PAGE || repositories.len() >= body.total_count {
                break;
            }
        }

        // Only forks need the detail call that reveals their parent
        let resolved = repositories.into_iter().map(|repository| async move {
            let parent_full_name = if repository.fork {
                let detail: ApiRepositoryDetail = self
                    .get_json(&format!("/repos/{}", repository.full_name), token)
                    .await?;
                detail.parent.map(|parent| parent.full_name)
            } else {
                None
            };

            Ok::<_, ExchangeError>(InstallationRepository {
                full_name: repository.full_name,
                name: repository.name,
                fork: repository.fork,
                parent_full_name,
            })
        });

        try_join_all(resolved).await
    }
}

#[async_trait]
impl GitHubOAuth for GitHubOAuthClient {
    #[tracing::instrument(skip_all)]
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, ExchangeError> {
        let url = format!("{}/login/oauth/access_token", self.web_url);
        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&serde_json::json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "code": code,
            }))
            .send()
            .await
            .map_err(|error| {
                tracing::warn!(%error, "OAuth token request failed");
                ExchangeError::Upstream { status: None }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                "OAuth token endpoint returned an error status"
            );
            return Err(ExchangeError::Upstream {
                status: Some(status.as_u16()),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|error| ExchangeError::InvalidResponse(error.to_string()))?;

        if let Some(error) = body.error {
            tracing::info!(
                error = %error,
                description = body.error_description.as_deref().unwrap_or(""),
                "OAuth code rejected"
            );
            return Err(ExchangeError::CodeInvalid);
        }

        body.access_token
            .filter(|token| !token.is_empty())
            .map(AccessToken::new)
            .ok_or_else(|| ExchangeError::InvalidResponse("missing access_token".to_string()))
    }

    #[tracing::instrument(skip_all)]
    async fn get_user(&self, token: &AccessToken) -> Result<GitHubUser, ExchangeError> {
        self.get_json("/user", token).await
    }

    #[tracing::instrument(skip_all)]
    async fn list_installations(
        &self,
        token: &AccessToken,
    ) -> Result<Vec<Installation>, ExchangeError> {
        let mut raw = Vec::new();

        for page in 1..=MAX_PAGES {
            let path = format!("/user/installations?per_page={PER_PAGE}&page={page}");
            let body: InstallationsPage = self.get_json(&path, token).await?;
            let received = body.installations.len();
            raw.extend(body.installations);

            if received < PER_PAGE || raw.len() >= body.total_count {
                break;
            }
        }

        tracing::debug!(count = raw.len(), "Fetched installations");

        // try_join_all keeps the upstream order
        let installations = raw.into_iter().map(|installation| async move {
            let repositories = self.list_repositories(installation.id, token).await?;
            Ok::<_, ExchangeError>(Installation {
                id: installation.id,
                account_login: installation
                    .account
                    .map(|account| account.login)
                    .unwrap_or_default(),
                repositories,
                permissions: installation.permissions.into_iter().collect::<Permissions>(),
            })
        });

        try_join_all(installations).await
    }
}
