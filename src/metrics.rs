/// Metrics for the Monalias resolver
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Resolution outcomes
/// - Rate limiter rejections and live buckets
/// - Identity watchdog verdicts and current instance status
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== Resolve Metrics ==========

    /// Resolutions by outcome (`normal`, `catch_all`, or an error code)
    pub static ref RESOLVE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "monalias_resolve_total",
        "Total number of resolve requests by outcome",
        &["outcome"]
    )
    .unwrap();

    // ========== Rate Limit Metrics ==========

    /// Requests refused by the per-source limiter
    pub static ref RATE_LIMITED_TOTAL: IntCounter = register_int_counter!(
        "monalias_rate_limited_total",
        "Total number of requests rejected by the rate limiter"
    )
    .unwrap();

    /// Live per-source buckets
    pub static ref RATE_LIMIT_BUCKETS: IntGauge = register_int_gauge!(
        "monalias_rate_buckets",
        "Number of per-source rate limit buckets currently held"
    )
    .unwrap();

    // ========== Identity Metrics ==========

    /// Watchdog cycles by resulting status
    pub static ref IDENTITY_CHECKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "monalias_identity_checks_total",
        "Total number of identity checks by resulting status",
        &["status"]
    )
    .unwrap();

    /// Current instance status: 0 OK, 1 DEGRADED, 2 LOCKED
    pub static ref INSTANCE_STATUS: IntGauge = register_int_gauge!(
        "monalias_instance_status",
        "Current instance identity status (0 OK, 1 DEGRADED, 2 LOCKED)"
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "monalias_background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "monalias_background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record a resolution outcome
pub fn record_resolve(outcome: &str) {
    RESOLVE_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a finished identity check
pub fn record_identity_check(status: &str) {
    IDENTITY_CHECKS_TOTAL.with_label_values(&[status]).inc();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_resolve() {
        record_resolve("normal");
        record_resolve("alias_not_found");
        let metrics = render_metrics();
        assert!(metrics.contains("monalias_resolve_total"));
        assert!(metrics.contains("outcome=\"alias_not_found\""));
    }

    #[test]
    fn test_record_identity_check() {
        record_identity_check("DEGRADED");
        INSTANCE_STATUS.set(1);
        let metrics = render_metrics();
        assert!(metrics.contains("monalias_identity_checks_total"));
        assert!(metrics.contains("monalias_instance_status"));
    }

    #[test]
    fn test_record_background_job() {
        record_background_job("rate_limit_sweep", "success", 0.002);
        let metrics = render_metrics();
        assert!(metrics.contains("monalias_background_jobs_total"));
        assert!(metrics.contains("monalias_background_job_duration_seconds"));
    }
}
