//! Prometheus counters, served as text at `/metrics`
//!
//! Counters live in a private registry so tests can read them without a
//! process-wide default registry.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("faasr_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");

    // Session Metrics
    pub static ref SESSIONS_ISSUED_TOTAL: IntCounter = IntCounter::new(
        "faasr_sessions_issued_total",
        "Total number of session cookies issued"
    ).expect("metric can be created");
    pub static ref SESSION_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("faasr_session_rejections_total", "Total number of rejected session cookies"),
        &["kind"]
    ).expect("metric can be created");

    // Callback Metrics
    pub static ref CALLBACK_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("faasr_callback_rejections_total", "Total number of rejected OAuth callbacks"),
        &["reason"]
    ).expect("metric can be created");

    // Workflow Metrics
    pub static ref WORKFLOW_UPLOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("faasr_workflow_uploads_total", "Total number of workflow file uploads"),
        &["result"]
    ).expect("metric can be created");
    pub static ref WORKFLOW_UPLOAD_BYTES: IntCounter = IntCounter::new(
        "faasr_workflow_upload_bytes_total",
        "Total bytes of workflow files committed"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("faasr_errors_total", "Total number of errors returned to clients"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Register all instruments with the global registry
///
/// Safe to call more than once; duplicate registrations are ignored.
pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(SESSIONS_ISSUED_TOTAL.clone()),
        Box::new(SESSION_REJECTIONS_TOTAL.clone()),
        Box::new(CALLBACK_REJECTIONS_TOTAL.clone()),
        Box::new(WORKFLOW_UPLOADS_TOTAL.clone()),
        Box::new(WORKFLOW_UPLOAD_BYTES.clone()),
        Box::new(ERRORS_TOTAL.clone()),
    ];

    for collector in collectors {
        if let Err(error) = REGISTRY.register(collector) {
            tracing::debug!(%error, "Metric already registered");
        }
    }
}

/// Encode all registered metrics in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
