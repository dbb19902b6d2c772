//! OAuth callback orchestration
//!
//! Composes code exchange, installation matching and token signing into a
//! single outcome: a signed session or a stable rejection reason.

use axum::http::StatusCode;

use crate::auth::{Session, SessionIdentity, token};
use crate::error::AppError;
use crate::github::{ExchangeError, GitHubOAuth, MatchError, select_installation};

/// Why a callback did not produce a session
///
/// `code()` values are stable and machine-checkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingCode,
    TokenExchangeFailed,
    NoInstallations,
    NoForkFound,
    MissingPermissions,
    InstallationFailed,
    InvalidResponse,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MissingCode => "missing_code",
            RejectReason::TokenExchangeFailed => "token_exchange_failed",
            RejectReason::NoInstallations => "no_installations",
            RejectReason::NoForkFound => "no_fork_found",
            RejectReason::MissingPermissions => "missing_permissions",
            RejectReason::InstallationFailed => "installation_failed",
            RejectReason::InvalidResponse => "invalid_response",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RejectReason::MissingCode => StatusCode::BAD_REQUEST,
            RejectReason::NoInstallations
            | RejectReason::NoForkFound
            | RejectReason::MissingPermissions => StatusCode::FORBIDDEN,
            RejectReason::TokenExchangeFailed
            | RejectReason::InstallationFailed
            | RejectReason::InvalidResponse => StatusCode::BAD_GATEWAY,
        }
    }

    /// Display text; user-fixable reasons say what to do
    pub fn message(&self, upstream: &str) -> String {
        match self {
            RejectReason::MissingCode => "Missing authorization code".to_string(),
            RejectReason::TokenExchangeFailed => {
                "Could not complete sign-in with GitHub. Please try again.".to_string()
            }
            RejectReason::NoInstallations => {
                "The FaaSr GitHub App is not installed on your account. Install it and try again."
                    .to_string()
            }
            RejectReason::NoForkFound => format!(
                "No fork of {upstream} was found. Fork the repository and install the app on the fork."
            ),
            RejectReason::MissingPermissions => format!(
                "The app installation on your fork of {upstream} lacks contents, workflows or metadata access. Update the installation permissions and try again."
            ),
            RejectReason::InstallationFailed => {
                "Could not read your GitHub App installations. Please try again.".to_string()
            }
            RejectReason::InvalidResponse => {
                "GitHub returned an unexpected response. Please try again.".to_string()
            }
        }
    }
}

/// Terminal state of one callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Issued { session: Session, token: String },
    Rejected(RejectReason),
}

/// Runs the callback state machine against a GitHub backend
pub struct CallbackOrchestrator<'a> {
    github: &'a dyn GitHubOAuth,
    secret: &'a str,
    upstream_owner: &'a str,
    upstream_repo: &'a str,
}

impl<'a> CallbackOrchestrator<'a> {
    pub fn new(
        github: &'a dyn GitHubOAuth,
        secret: &'a str,
        upstream_owner: &'a str,
        upstream_repo: &'a str,
    ) -> Self {
        Self {
            github,
            secret,
            upstream_owner,
            upstream_repo,
        }
    }

    /// Handle a callback at time `now` (seconds since epoch)
    ///
    /// # Errors
    /// Only if the session cannot be serialized; every GitHub-side failure is
    /// a `Rejected` outcome.
    pub async fn handle(&self, code: Option<&str>, now: i64) -> Result<CallbackOutcome, AppError> {
        let Some(code) = code.map(str::trim).filter(|code| !code.is_empty()) else {
            return Ok(CallbackOutcome::Rejected(RejectReason::MissingCode));
        };

        let access_token = match self.github.exchange_code(code).await {
            Ok(token) => token,
            Err(ExchangeError::InvalidResponse(detail)) => {
                tracing::warn!(%detail, "Token endpoint returned an unexpected body");
                return Ok(CallbackOutcome::Rejected(RejectReason::InvalidResponse));
            }
            Err(error) => {
                tracing::warn!(%error, "Authorization code exchange failed");
                return Ok(CallbackOutcome::Rejected(RejectReason::TokenExchangeFailed));
            }
        };

        let user = match self.github.get_user(&access_token).await {
            Ok(user) => user,
            Err(error) => {
                tracing::warn!(%error, "Fetching GitHub user failed");
                return Ok(CallbackOutcome::Rejected(RejectReason::InvalidResponse));
            }
        };

        let installations = match self.github.list_installations(&access_token).await {
            Ok(installations) => installations,
            Err(error) => {
                tracing::warn!(%error, login = %user.login, "Listing installations failed");
                return Ok(CallbackOutcome::Rejected(RejectReason::InstallationFailed));
            }
        };

        if installations.is_empty() {
            tracing::info!(login = %user.login, "User has no installations of the app");
            return Ok(CallbackOutcome::Rejected(RejectReason::NoInstallations));
        }

        let selected =
            match select_installation(&installations, self.upstream_owner, self.upstream_repo) {
                Ok(selected) => selected,
                Err(error) => {
                    tracing::info!(%error, login = %user.login, "No usable installation");
                    let reason = match error {
                        MatchError::NoForkFound => RejectReason::NoForkFound,
                        MatchError::MissingPermissions { .. } => RejectReason::MissingPermissions,
                    };
                    return Ok(CallbackOutcome::Rejected(reason));
                }
            };

        let session = Session::issue(
            SessionIdentity {
                installation_id: selected.installation.id.to_string(),
                gh_user_login: user.login,
                gh_user_id: user.id,
                gh_repo_name: selected.fork.name,
                gh_avatar_url: user.avatar_url,
            },
            now,
        );
        let token = token::sign(&session, self.secret)?;

        tracing::info!(
            login = %session.gh_user_login,
            installation_id = %session.installation_id,
            repo = %session.gh_repo_name,
            "Session issued"
        );

        Ok(CallbackOutcome::Issued { session, token })
    }
}
