use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all scheduler metrics
const PREFIX: &str = "export_scheduler";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 300.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Invocations
    pub static ref INVOCATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_invocations_total"), "Export invocations by trigger and outcome"),
        &["trigger", "status"]
    ).expect("Failed to create invocations_total metric");

    pub static ref INVOCATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_invocation_duration_seconds"),
            "Duration of export invocations in seconds"
        )
        .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]),
        &["trigger"]
    ).expect("Failed to create invocation_duration_seconds metric");

    pub static ref EXPORTED_FILES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_exported_files_total"),
        "Files reported by successful exports"
    ).expect("Failed to create exported_files_total metric");

    pub static ref SKIPPED_TICKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_skipped_ticks_total"), "Timer ticks that started nothing"),
        &["reason"]
    ).expect("Failed to create skipped_ticks_total metric");

    pub static ref BUSY_REJECTIONS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_busy_rejections_total"),
        "On-demand requests rejected because an export was in flight"
    ).expect("Failed to create busy_rejections_total metric");

    pub static ref INVOCATION_RUNNING: Gauge = Gauge::new(
        format!("{PREFIX}_invocation_running"),
        "1 while an export invocation is in flight"
    ).expect("Failed to create invocation_running metric");

    // Leadership
    pub static ref IS_LEADER: Gauge = Gauge::new(
        format!("{PREFIX}_is_leader"),
        "1 while this process holds the lease"
    ).expect("Failed to create is_leader metric");

    pub static ref LEADERSHIP_TRANSITIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_leadership_transitions_total"), "Leadership gained/lost events"),
        &["event"]
    ).expect("Failed to create leadership_transitions_total metric");

    // Cleanup
    pub static ref CLEANUP_REMOVED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_cleanup_removed_total"),
        "Directories removed by the cleanup sweeper"
    ).expect("Failed to create cleanup_removed_total metric");

    pub static ref CLEANUP_FAILURES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_cleanup_failures_total"),
        "Cleanup sweeps or removals that failed"
    ).expect("Failed to create cleanup_failures_total metric");
}

/// Register all metrics with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(INVOCATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INVOCATION_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(EXPORTED_FILES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SKIPPED_TICKS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BUSY_REJECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INVOCATION_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(IS_LEADER.clone()));
    let _ = REGISTRY.register(Box::new(LEADERSHIP_TRANSITIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CLEANUP_REMOVED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CLEANUP_FAILURES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record a finished export invocation
pub fn record_invocation(trigger: &str, status: &str, duration: Duration) {
    INVOCATIONS_TOTAL.with_label_values(&[trigger, status]).inc();
    INVOCATION_DURATION_SECONDS
        .with_label_values(&[trigger])
        .observe(duration.as_secs_f64());
}

pub fn record_exported_files(count: usize) {
    EXPORTED_FILES_TOTAL.inc_by(count as f64);
}

pub fn record_skipped_tick(reason: &str) {
    SKIPPED_TICKS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_busy_rejection() {
    BUSY_REJECTIONS_TOTAL.inc();
}

pub fn set_invocation_running(running: bool) {
    INVOCATION_RUNNING.set(if running { 1.0 } else { 0.0 });
}

pub fn set_is_leader(leader: bool) {
    IS_LEADER.set(if leader { 1.0 } else { 0.0 });
}

pub fn record_leadership_transition(event: &str) {
    LEADERSHIP_TRANSITIONS_TOTAL.with_label_values(&[event]).inc();
}

/// Record the result of one cleanup sweep
pub fn record_cleanup(removed: usize, failures: usize) {
    CLEANUP_REMOVED_TOTAL.inc_by(removed as f64);
    CLEANUP_FAILURES_TOTAL.inc_by(failures as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        record_skipped_tick("follower");

        let metric_families = REGISTRY.gather();
        assert!(!metric_families.is_empty(), "Metrics should be registered");
        assert!(metric_families
            .iter()
            .all(|m| m.get_name().starts_with("export_scheduler_")));
    }

    #[test]
    fn test_record_invocation() {
        init_metrics();

        let before = INVOCATIONS_TOTAL
            .with_label_values(&["on_demand", "success"])
            .get();
        record_invocation("on_demand", "success", Duration::from_millis(50));
        let after = INVOCATIONS_TOTAL
            .with_label_values(&["on_demand", "success"])
            .get();

        assert!(after >= before + 1.0);
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_text() {
        init_metrics();
        record_busy_rejection();

        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
