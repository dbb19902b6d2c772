//! Session extractor
//!
//! Protects endpoints that require a session cookie.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};

use super::session::{Session, SessionError, extract_session};
use crate::AppState;
use crate::error::AppError;
use crate::metrics::SESSION_REJECTIONS_TOTAL;

fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();

    if values.is_empty() {
        None
    } else {
        Some(values.join("; "))
    }
}

/// Authenticate a request from its headers
///
/// Increments the rejection metric on failure.
pub fn authenticate_headers(headers: &HeaderMap, secret: &str) -> Result<Session, SessionError> {
    let header = cookie_header(headers);
    extract_session(header.as_deref(), secret).inspect_err(|error| {
        SESSION_REJECTIONS_TOTAL
            .with_label_values(&[error.kind()])
            .inc();
        tracing::debug!(kind = error.kind(), "Rejected session cookie");
    })
}

/// Extractor for the current session
///
/// Protected handlers take this as an argument so the session check runs
/// before any handler work; a failure responds 401 with the failure body.
///
/// # Usage
/// ```ignore
/// async fn handler(
///     CurrentSession(session): CurrentSession,
/// ) -> impl IntoResponse {
///     format!("Hello, {}", session.gh_user_login)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<Session>().cloned() {
            return Ok(CurrentSession(session));
        }

        let state = AppState::from_ref(state);
        let session = authenticate_headers(&parts.headers, &state.config.auth.session_secret)?;
        parts.extensions.insert(session.clone());

        Ok(CurrentSession(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn multiple_cookie_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));

        assert_eq!(cookie_header(&headers).as_deref(), Some("a=1; b=2"));
    }

    #[test]
    fn no_cookie_header_is_missing_session() {
        let headers = HeaderMap::new();
        assert_eq!(
            authenticate_headers(&headers, "x").unwrap_err(),
            SessionError::Missing
        );
    }
}
