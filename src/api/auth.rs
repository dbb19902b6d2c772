//! Install, callback, auth status and logout endpoints

use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::dto::{AuthStatusResponse, CallbackResponse, InstallResponse, LogoutResponse};
use crate::AppState;
use crate::auth::{CurrentSession, removal_cookie, session_cookie};
use crate::error::{AppError, FailureBody};
use crate::metrics::{CALLBACK_REJECTIONS_TOTAL, SESSIONS_ISSUED_TOTAL};
use crate::service::{CallbackOrchestrator, CallbackOutcome};

/// GET install-v2
///
/// Returns the GitHub URL that installs the app.
pub async fn install(State(state): State<AppState>) -> Json<InstallResponse> {
    Json(InstallResponse {
        success: true,
        redirect_url: state.config.github.install_url(),
        message: "Install the GitHub App on your fork to continue".to_string(),
    })
}

/// Query parameters GitHub appends to the callback
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    /// Authorization code
    code: Option<String>,
    /// Present when the callback follows an installation
    installation_id: Option<String>,
    /// "install", "update" or "request"
    setup_action: Option<String>,
}

/// GET callback-v2?code=
///
/// # Steps
/// 1. Exchange code for a user access token
/// 2. Find the installation on the user's fork
/// 3. Sign a session and set the session cookie
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<Response, AppError> {
    tracing::debug!(
        installation_id = query.installation_id.as_deref().unwrap_or(""),
        setup_action = query.setup_action.as_deref().unwrap_or(""),
        "OAuth callback received"
    );

    let github = &state.config.github;
    let orchestrator = CallbackOrchestrator::new(
        state.oauth.as_ref(),
        &state.config.auth.session_secret,
        &github.upstream_owner,
        &github.upstream_repo,
    );

    let outcome = orchestrator
        .handle(query.code.as_deref(), chrono::Utc::now().timestamp())
        .await?;

    match outcome {
        CallbackOutcome::Issued { session, token } => {
            SESSIONS_ISSUED_TOTAL.inc();
            let jar = jar.add(session_cookie(token, state.config.should_use_secure_cookies()));
            let body = CallbackResponse {
                success: true,
                message: format!("Signed in as {}", session.gh_user_login),
                login: session.gh_user_login,
            };
            Ok((jar, Json(body)).into_response())
        }
        CallbackOutcome::Rejected(reason) => {
            CALLBACK_REJECTIONS_TOTAL
                .with_label_values(&[reason.code()])
                .inc();
            let body =
                FailureBody::new(reason.code(), reason.message(&github.upstream_full_name()));
            Ok((reason.status(), Json(body)).into_response())
        }
    }
}

/// GET auth-status-v2
pub async fn auth_status(CurrentSession(session): CurrentSession) -> Json<AuthStatusResponse> {
    Json(AuthStatusResponse {
        user_login: session.gh_user_login,
        avatar_url: session.gh_avatar_url,
        repo_name: session.gh_repo_name,
    })
}

/// POST logout-v2
///
/// Clears the session cookie. Works with an invalid or expired cookie too,
/// since there is nothing server-side to revoke.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<LogoutResponse>) {
    let jar = jar.add(removal_cookie(state.config.should_use_secure_cookies()));
    (
        jar,
        Json(LogoutResponse {
            success: true,
            message: "Signed out".to_string(),
        }),
    )
}
