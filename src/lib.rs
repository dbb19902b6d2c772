//! faasr-gateway: stateless GitHub App gateway for FaaSr workflows
//!
//! A user installs the app on their fork of the upstream workflow
//! repository and signs in through the OAuth callback, which issues a
//! signed session cookie. No session state is stored server-side. The
//! cookie then authorizes uploading a workflow file, which is committed to
//! the fork and registered by dispatching a GitHub Actions workflow.
//!
//! ```text
//! browser ──callback-v2──▶ service::callback ──▶ github::oauth
//!    │                          │ signs
//!    │◀──── faasr_session_v2 ───┘ auth::token
//!    │
//!    └─workflows-v2─▶ auth::CurrentSession ─▶ service::workflow ─▶ github::app
//! ```
//!
//! `poller` is the client half: it uploads a file and polls its
//! registration run until it finishes or times out.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod github;
pub mod metrics;
pub mod poller;
pub mod service;

use std::sync::Arc;

/// Shared handler state
///
/// Read-only at request time; there is no per-user server state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (includes the session signing secret)
    pub config: Arc<config::AppConfig>,

    /// User-scoped GitHub OAuth client
    pub oauth: Arc<dyn github::GitHubOAuth>,

    /// GitHub App client for repository operations
    pub github_app: Arc<github::GitHubAppClient>,
}

impl AppState {
    /// # Errors
    /// Fails if the HTTP client cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("faasr-gateway/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        let oauth = github::GitHubOAuthClient::new(http_client.clone(), &config.github);
        let github_app = github::GitHubAppClient::new(http_client, &config.github);

        tracing::info!(
            upstream = %config.github.upstream_full_name(),
            app_id = config.github.app_id,
            "Application state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            oauth: Arc::new(oauth),
            github_app: Arc::new(github_app),
        })
    }
}

/// Full router: `/health`, `/metrics`, and the V2 endpoints under
/// `server.functions_base_path`
///
/// The binary and the integration tests both serve this.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    let cors_layer = build_cors_layer(&state.config.server);
    let functions = api::functions_router(&state.config);
    let base_path = state
        .config
        .server
        .functions_base_path
        .trim_end_matches('/')
        .to_string();

    let router = Router::new().route("/health", axum::routing::get(health_check));
    let router = if base_path.is_empty() {
        router.merge(functions)
    } else {
        router.nest(&base_path, functions)
    };

    router
        .layer(axum::middleware::from_fn(api::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::{HeaderValue, Method, header};
    use tower_http::cors::CorsLayer;

    // The session cookie is only sent cross-origin with credentials enabled,
    // which forbids wildcard origins.
    let Some(origin) = server.frontend_origin.as_deref() else {
        if server.protocol.eq_ignore_ascii_case("https") {
            return CorsLayer::new();
        }
        return CorsLayer::permissive();
    };

    match HeaderValue::from_str(origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %origin,
                "Failed to parse server.frontend_origin; denying cross-origin requests"
            );
            CorsLayer::new()
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
