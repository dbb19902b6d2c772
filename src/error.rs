//! Error types for the gateway
//!
//! All handler errors are converted to `AppError`, which implements
//! `IntoResponse` and always renders the stable
//! `{success: false, error, message}` failure body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::SessionError;
use crate::github::GitHubAppError;

/// Every way a request can fail
///
/// Each variant has a fixed status code and stable error code; the
/// message is for display only.
#[derive(Debug, Error)]
pub enum AppError {
    /// 404, e.g. no registration run yet
    #[error("{0}")]
    NotFound(String),

    /// 401, missing or invalid session cookie
    #[error("Authentication required: {0}")]
    Unauthorized(#[from] SessionError),

    /// 400, uploaded workflow file rejected
    #[error("{0}")]
    InvalidFile(String),

    /// 400, malformed query or form input
    #[error("Invalid request: {0}")]
    Validation(String),

    /// 502, GitHub App API failure
    #[error("GitHub request failed: {0}")]
    GitHub(#[from] GitHubAppError),

    /// 500
    #[error("Configuration error: {0}")]
    Config(String),

    /// 500
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Failure body shared by every endpoint
///
/// The browser branches on `error` and displays `message` verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureBody {
    pub success: bool,
    pub error: String,
    pub message: String,
}

impl FailureBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            message: message.into(),
        }
    }
}

impl AppError {
    /// Status code and stable error code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::InvalidFile(_) => (StatusCode::BAD_REQUEST, "invalid_file"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            AppError::GitHub(_) => (StatusCode::BAD_GATEWAY, "github_error"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for AppError {
    /// Server-side failures are logged in full and rendered with a generic
    /// message so internals never reach the browser.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, code) = self.status_and_code();
        let message = if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            tracing::error!(error = %self, "Request failed with internal error");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        crate::metrics::ERRORS_TOTAL.with_label_values(&[code]).inc();

        (status, Json(FailureBody::new(code, message))).into_response()
    }
}
