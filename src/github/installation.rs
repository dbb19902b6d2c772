//! GitHub App installations and fork matching
//!
//! Installations are fetched fresh on every callback and never persisted.
//! The matcher picks the one that can act on the user's fork of the
//! canonical upstream repository.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Access level granted for one permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Read,
    Write,
    Admin,
}

impl PermissionLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Permission set granted to an installation, keyed by permission name
///
/// Values are kept as GitHub sends them so unknown levels never fail
/// deserialization; they simply grant nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeMap<String, String>);

impl Permissions {
    pub fn level(&self, name: &str) -> Option<PermissionLevel> {
        self.0.get(name).and_then(|value| PermissionLevel::parse(value))
    }

    /// Whether `name` is granted at `minimum` or higher
    pub fn grants(&self, name: &str, minimum: PermissionLevel) -> bool {
        self.level(name).is_some_and(|level| level >= minimum)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Permissions {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, level)| (name.into(), level.into()))
                .collect(),
        )
    }
}

/// Repository reachable through an installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRepository {
    /// e.g. "octocat/FaaSr-workflow"
    pub full_name: String,
    pub name: String,
    pub fork: bool,
    /// Full name of the repository this one was forked from
    pub parent_full_name: Option<String>,
}

impl InstallationRepository {
    /// Whether this repository is a fork of `owner/repo`
    ///
    /// Requires the fork relationship; a same-named repository is not enough.
    pub fn is_fork_of(&self, owner: &str, repo: &str) -> bool {
        let upstream = format!("{owner}/{repo}");
        self.fork
            && self
                .parent_full_name
                .as_deref()
                .is_some_and(|parent| parent.eq_ignore_ascii_case(&upstream))
    }
}

/// A GitHub App installation visible to the authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: u64,
    pub account_login: String,
    pub repositories: Vec<InstallationRepository>,
    pub permissions: Permissions,
}

/// Permissions an installation needs to commit and dispatch on the fork
pub const REQUIRED_PERMISSIONS: [(&str, PermissionLevel); 3] = [
    ("contents", PermissionLevel::Write),
    ("workflows", PermissionLevel::Write),
    ("metadata", PermissionLevel::Read),
];

impl Installation {
    /// Names of required permissions this installation lacks
    pub fn missing_permissions(&self) -> Vec<&'static str> {
        REQUIRED_PERMISSIONS
            .iter()
            .filter(|(name, minimum)| !self.permissions.grants(name, *minimum))
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn fork_of(&self, owner: &str, repo: &str) -> Option<&InstallationRepository> {
        self.repositories
            .iter()
            .find(|repository| repository.is_fork_of(owner, repo))
    }
}

/// The installation chosen for a session, with the fork it matched on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationMatch {
    pub installation: Installation,
    pub fork: InstallationRepository,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("no installation includes a fork of the upstream repository")]
    NoForkFound,
    #[error("installation {installation_id} is missing permissions: {}", .missing.join(", "))]
    MissingPermissions {
        installation_id: u64,
        missing: Vec<&'static str>,
    },
}

/// Select the installation that can act on a fork of `owner/repo`
///
/// Installations are scanned in the order GitHub returned them; the first
/// one holding a fork with sufficient permissions wins. If forks exist but
/// none of their installations are sufficiently permissioned, the first
/// under-permissioned one is reported.
pub fn select_installation(
    installations: &[Installation],
    owner: &str,
    repo: &str,
) -> Result<InstallationMatch, MatchError> {
    let mut under_permissioned: Option<MatchError> = None;

    for installation in installations {
        let Some(fork) = installation.fork_of(owner, repo) else {
            continue;
        };

        let missing = installation.missing_permissions();
        if missing.is_empty() {
            return Ok(InstallationMatch {
                installation: installation.clone(),
                fork: fork.clone(),
            });
        }

        tracing::debug!(
            installation_id = installation.id,
            fork = %fork.full_name,
            missing = ?missing,
            "Fork found on installation without required permissions"
        );
        under_permissioned.get_or_insert(MatchError::MissingPermissions {
            installation_id: installation.id,
            missing,
        });
    }

    Err(under_permissioned.unwrap_or(MatchError::NoForkFound))
}
