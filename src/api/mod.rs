//! API layer
//!
//! HTTP handlers for:
//! - Session endpoints (install, callback, auth status, logout)
//! - Workflow upload and registration status
//! - Metrics (Prometheus)

mod auth;
mod dto;
pub mod metrics;
mod workflows;

pub use dto::*;

pub use metrics::metrics_router;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::Request,
    middleware::Next,
    response::Response,
    routing::{get, post},
};

use crate::AppState;
use crate::config::AppConfig;
use crate::metrics::HTTP_REQUESTS_TOTAL;

/// Multipart framing overhead allowed on top of the file size limit
const MULTIPART_OVERHEAD_BYTES: usize = 16 * 1024;

/// Create the V2 functions router
///
/// Mounted under `server.functions_base_path`.
pub fn functions_router(config: &AppConfig) -> Router<AppState> {
    Router::new()
        .route("/install-v2", get(auth::install))
        .route("/callback-v2", get(auth::callback))
        .route("/auth-status-v2", get(auth::auth_status))
        .route("/logout-v2", post(auth::logout))
        .route(
            "/workflows-v2",
            post(workflows::upload_workflow)
                .get(workflows::registration_status)
                .layer(DefaultBodyLimit::max(
                    config.upload.max_file_bytes + MULTIPART_OVERHEAD_BYTES,
                )),
        )
}

/// Count requests by method, matched route and status
pub async fn track_requests(
    matched_path: Option<MatchedPath>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let endpoint = matched_path
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &endpoint, response.status().as_str()])
        .inc();

    response
}
