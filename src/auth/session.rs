//! Session management
//!
//! Sessions are signed tokens stored in a cookie.
//! No server-side session storage needed; revocation is time-bounded only.

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::token::{self, TokenError};
use super::{SESSION_COOKIE_NAME, SESSION_TTL_SECS};

/// Authenticated GitHub installation identity
///
/// Stored in the `faasr_session_v2` cookie. Read-only once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// GitHub App installation selected at login
    pub installation_id: String,
    /// GitHub username
    pub gh_user_login: String,
    /// GitHub user ID
    pub gh_user_id: u64,
    /// Name of the user's fork of the upstream repository
    pub gh_repo_name: String,
    /// Avatar URL from GitHub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gh_avatar_url: Option<String>,
    /// Issued at (seconds since epoch)
    pub iat: i64,
    /// Expires at (seconds since epoch), always `iat + SESSION_TTL_SECS`
    pub exp: i64,
    /// Random nonce unique per issuance
    pub jti: String,
}

/// Identity captured during the OAuth callback, before timestamps are assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub installation_id: String,
    pub gh_user_login: String,
    pub gh_user_id: u64,
    pub gh_repo_name: String,
    pub gh_avatar_url: Option<String>,
}

impl Session {
    /// Issue a new session at `now` with a fresh nonce
    pub fn issue(identity: SessionIdentity, now: i64) -> Self {
        Self {
            installation_id: identity.installation_id,
            gh_user_login: identity.gh_user_login,
            gh_user_id: identity.gh_user_id,
            gh_repo_name: identity.gh_repo_name,
            gh_avatar_url: identity.gh_avatar_url,
            iat: now,
            exp: now + SESSION_TTL_SECS,
            jti: generate_nonce(),
        }
    }
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Why a request carries no usable session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no session cookie")]
    Missing,
    #[error("session token is malformed")]
    Malformed,
    #[error("session signature is invalid")]
    SignatureMismatch,
    #[error("session has expired")]
    Expired,
    #[error("session is incomplete")]
    Incomplete,
}

impl SessionError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Missing => "missing",
            SessionError::Malformed => "malformed",
            SessionError::SignatureMismatch => "signature_mismatch",
            SessionError::Expired => "expired",
            SessionError::Incomplete => "incomplete",
        }
    }
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => SessionError::Malformed,
            TokenError::SignatureMismatch => SessionError::SignatureMismatch,
            TokenError::Expired => SessionError::Expired,
            TokenError::Incomplete => SessionError::Incomplete,
        }
    }
}

/// Read and verify the session from a raw `Cookie` header value
///
/// # Errors
/// `SessionError::Missing` if there is no header or no session cookie in it;
/// otherwise the token verification failure.
pub fn extract_session(cookie_header: Option<&str>, secret: &str) -> Result<Session, SessionError> {
    extract_session_at(cookie_header, secret, chrono::Utc::now().timestamp())
}

pub(crate) fn extract_session_at(
    cookie_header: Option<&str>,
    secret: &str,
    now: i64,
) -> Result<Session, SessionError> {
    let header = cookie_header.ok_or(SessionError::Missing)?;

    let token = Cookie::split_parse(header)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE_NAME)
        .map(|cookie| cookie.value().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or(SessionError::Missing)?;

    Ok(token::verify_at(&token, secret, now)?)
}

/// Build the cookie that carries a freshly signed session
pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time_duration(SESSION_TTL_SECS))
        .build()
}

/// Build the cookie that clears the session on logout
pub fn removal_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time_duration(0))
        .build()
}

fn time_duration(seconds: i64) -> time::Duration {
    time::Duration::seconds(seconds)
}
