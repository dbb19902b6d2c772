//! Session token codec
//!
//! Compact HS256 tokens: `base64url(header).base64url(payload).base64url(mac)`.
//! The same secret signs and verifies. Pure functions, no I/O.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use super::session::Session;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_ALGORITHM: &str = "HS256";
const TOKEN_TYPE: &str = "JWT";

/// Reasons a token is refused
///
/// Any of these means "no session"; a token is never partially trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    SignatureMismatch,
    #[error("token has expired")]
    Expired,
    #[error("token is missing required claims")]
    Incomplete,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: Option<String>,
}

/// Claims as they appear on the wire, before presence is enforced
#[derive(Debug, Deserialize)]
struct RawClaims {
    installation_id: Option<String>,
    gh_user_login: Option<String>,
    gh_user_id: Option<u64>,
    gh_repo_name: Option<String>,
    gh_avatar_url: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
    jti: Option<String>,
}

impl RawClaims {
    fn into_session(self) -> Option<Session> {
        fn required(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }

        Some(Session {
            installation_id: required(self.installation_id)?,
            gh_user_login: required(self.gh_user_login)?,
            gh_user_id: self.gh_user_id?,
            gh_repo_name: required(self.gh_repo_name)?,
            gh_avatar_url: self.gh_avatar_url,
            iat: self.iat?,
            exp: self.exp?,
            jti: required(self.jti)?,
        })
    }
}

/// Sign a session into a compact token
///
/// # Errors
/// Fails only if the payload cannot be serialized.
pub fn sign(session: &Session, secret: &str) -> Result<String, crate::error::AppError> {
    let header = serde_json::to_vec(&TokenHeader {
        alg: TOKEN_ALGORITHM.to_string(),
        typ: Some(TOKEN_TYPE.to_string()),
    })
    .map_err(|e| crate::error::AppError::Internal(e.into()))?;
    let payload =
        serde_json::to_vec(session).map_err(|e| crate::error::AppError::Internal(e.into()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let signature = URL_SAFE_NO_PAD.encode(mac_for(&signing_input, secret).finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}

/// Verify a token against the current time
pub fn verify(token: &str, secret: &str) -> Result<Session, TokenError> {
    verify_at(token, secret, chrono::Utc::now().timestamp())
}

/// Verify a token against an explicit clock (seconds since the epoch)
///
/// Checks run in a fixed order and stop at the first failure:
/// structure, signature, expiry, then required claims.
pub fn verify_at(token: &str, secret: &str, now: i64) -> Result<Session, TokenError> {
    let mut segments = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Malformed);
    };

    let header: TokenHeader = decode_json(header_b64)?;
    if header.alg != TOKEN_ALGORITHM {
        return Err(TokenError::Malformed);
    }
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| TokenError::Malformed)?;

    // verify_slice compares in constant time
    let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
    mac_for(signing_input, secret)
        .verify_slice(&signature)
        .map_err(|_| TokenError::SignatureMismatch)?;

    let claims: RawClaims = decode_json(payload_b64)?;

    if let Some(exp) = claims.exp {
        if now >= exp {
            return Err(TokenError::Expired);
        }
    }

    claims.into_session().ok_or(TokenError::Incomplete)
}

fn mac_for(signing_input: &str, secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts any key length"));
    mac.update(signing_input.as_bytes());
    mac
}

fn decode_json<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
