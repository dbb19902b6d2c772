//! GitHub integration
//!
//! - `oauth`: user-to-server OAuth exchange and installation discovery
//! - `installation`: installation types and fork matching
//! - `app`: app JWT, installation tokens, contents and Actions calls

pub mod app;
pub mod installation;
pub mod oauth;

pub use app::{FileCommit, GitHubAppClient, GitHubAppError, InstallationToken, WorkflowRun};
pub use installation::{
    Installation, InstallationMatch, InstallationRepository, MatchError, PermissionLevel,
    Permissions, select_installation,
};
pub use oauth::{AccessToken, ExchangeError, GitHubOAuth, GitHubOAuthClient, GitHubUser};

/// Media type for GitHub REST responses
pub(crate) const GITHUB_JSON: &str = "application/vnd.github+json";

/// REST API version pinned on every request
pub(crate) const GITHUB_API_VERSION: &str = "2022-11-28";
