/// Metrics and telemetry for Propel Hub
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Token issuance and settlement outcomes
/// - Platform link activity
/// - Quota decisions by tier
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Token Metrics ==========

    /// Tokens issued by kind
    pub static ref TOKENS_ISSUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tokens_issued_total",
        "Total number of tokens issued",
        &["kind"]
    )
    .unwrap();

    /// Redemption attempts by kind and outcome
    pub static ref TOKEN_REDEMPTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "token_redemptions_total",
        "Total number of token redemption attempts",
        &["kind", "outcome"]
    )
    .unwrap();

    /// Tokens revoked by kind
    pub static ref TOKENS_REVOKED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tokens_revoked_total",
        "Total number of tokens revoked",
        &["kind"]
    )
    .unwrap();

    // ========== Identity Metrics ==========

    /// Accounts created
    pub static ref ACCOUNTS_CREATED_TOTAL: IntCounter = register_int_counter!(
        "accounts_created_total",
        "Total number of accounts created"
    )
    .unwrap();

    /// Platform links by provider
    pub static ref PLATFORM_LINKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "platform_links_total",
        "Total number of platform identities linked",
        &["provider"]
    )
    .unwrap();

    // ========== Quota Metrics ==========

    /// Quota decisions by tier and outcome
    pub static ref QUOTA_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quota_decisions_total",
        "Total number of quota gate decisions",
        &["tier", "outcome"]
    )
    .unwrap();

    // ========== Billing Metrics ==========

    /// Billing events ingested by event type
    pub static ref BILLING_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "billing_events_total",
        "Total number of billing events processed",
        &["event"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    // ========== Error Metrics ==========

    /// Errors by error type
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "errors_total",
        "Total number of errors",
        &["error_type", "module"]
    )
    .unwrap();

    // ========== System Metrics ==========

    /// Application uptime in seconds
    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "uptime_seconds",
        "Application uptime in seconds"
    )
    .unwrap();

    /// Active tokens last observed by the sweep job
    pub static ref TOKENS_PENDING: IntGauge = register_int_gauge!(
        "tokens_pending",
        "Pending tokens at the last sweep"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a token issuance
pub fn record_token_issued(kind: &str) {
    TOKENS_ISSUED_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a redemption attempt outcome
pub fn record_token_redemption(kind: &str, outcome: &str) {
    TOKEN_REDEMPTIONS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

/// Record a token revocation
pub fn record_token_revoked(kind: &str) {
    TOKENS_REVOKED_TOTAL.with_label_values(&[kind]).inc();
}

/// Record an account creation
pub fn record_account_created() {
    ACCOUNTS_CREATED_TOTAL.inc();
}

/// Record a platform link
pub fn record_platform_link(provider: &str) {
    PLATFORM_LINKS_TOTAL.with_label_values(&[provider]).inc();
}

/// Record a quota gate decision
pub fn record_quota_decision(tier: &str, allowed: bool) {
    QUOTA_DECISIONS_TOTAL
        .with_label_values(&[tier, if allowed { "allowed" } else { "denied" }])
        .inc();
}

/// Record a billing event
pub fn record_billing_event(event: &str) {
    BILLING_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}

/// Record an error
pub fn record_error(error_type: &str, module: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, module])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/v1/invites", 200, 0.05);
        let metrics = render_metrics();
        assert!(metrics.contains("http_requests_total"));
        assert!(metrics.contains("http_request_duration_seconds"));
    }

    #[test]
    fn test_record_token_lifecycle() {
        record_token_issued("startup_invite");
        record_token_redemption("startup_invite", "used");
        record_token_redemption("startup_invite", "already_used");
        record_token_revoked("team_invite");
        let metrics = render_metrics();
        assert!(metrics.contains("tokens_issued_total"));
        assert!(metrics.contains("token_redemptions_total"));
        assert!(metrics.contains("tokens_revoked_total"));
    }

    #[test]
    fn test_record_quota_decision() {
        record_quota_decision("free", true);
        record_quota_decision("free", false);
        record_quota_decision("pro", true);
        let metrics = render_metrics();
        assert!(metrics.contains("quota_decisions_total"));
    }

    #[test]
    fn test_record_background_job() {
        record_background_job("token_sweep", "success", 1.5);
        let metrics = render_metrics();
        assert!(metrics.contains("background_jobs_total"));
        assert!(metrics.contains("background_job_duration_seconds"));
    }

    #[test]
    fn test_metrics_rendering() {
        record_http_request("GET", "/health", 200, 0.01);
        record_account_created();
        record_platform_link("telegram");

        let metrics = render_metrics();

        assert!(metrics.contains("# HELP") || !metrics.is_empty());
        assert!(metrics.contains("# TYPE") || !metrics.is_empty());
        assert!(metrics.contains("accounts_created_total"));
        assert!(metrics.contains("platform_links_total"));
    }
}
