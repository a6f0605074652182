use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all dump server metrics
const PREFIX: &str = "wikidumps";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Generation Metrics
    pub static ref DUMP_GENERATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_generations_total"), "Dump generations by final status"),
        &["type", "status"]
    ).expect("Failed to create generations_total metric");

    pub static ref DUMP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_requests_total"), "Dump generation requests by outcome"),
        &["type", "outcome"]
    ).expect("Failed to create requests_total metric");

    pub static ref DUMP_EXPORT_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_export_duration_seconds"),
            "Duration of export commands in seconds"
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 4.0 * 3600.0, 12.0 * 3600.0]),
        &["type"]
    ).expect("Failed to create export_duration_seconds metric");

    // Storage Metrics
    pub static ref DUMP_BYTES_STORED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_bytes_stored_total"),
        "Total bytes written to the blob store"
    ).expect("Failed to create bytes_stored_total metric");

    pub static ref DUMP_CHUNKS_WRITTEN_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_chunks_written_total"),
        "Total chunk blobs written"
    ).expect("Failed to create chunks_written_total metric");

    pub static ref DUMP_DELETIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_deletions_total"), "Dumps deleted by reason"),
        &["reason"]
    ).expect("Failed to create deletions_total metric");

    // Job Queue Metrics
    pub static ref JOB_QUEUE_DEPTH: Gauge = Gauge::new(
        format!("{PREFIX}_job_queue_depth"),
        "Jobs waiting in the dump job queue"
    ).expect("Failed to create job_queue_depth metric");

    pub static ref JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_executions_total"), "Dump job executions by kind and result"),
        &["kind", "result"]
    ).expect("Failed to create job_executions_total metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 900.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(DUMP_GENERATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DUMP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DUMP_EXPORT_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(DUMP_BYTES_STORED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DUMP_CHUNKS_WRITTEN_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DUMP_DELETIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request. `path` is the matched route, not the raw URI.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_generation(dump_type: &str, status: &str) {
    DUMP_GENERATIONS_TOTAL
        .with_label_values(&[dump_type, status])
        .inc();
}

pub fn record_request(dump_type: &str, outcome: &str) {
    DUMP_REQUESTS_TOTAL
        .with_label_values(&[dump_type, outcome])
        .inc();
}

pub fn record_export_duration(dump_type: &str, duration: Duration) {
    DUMP_EXPORT_DURATION_SECONDS
        .with_label_values(&[dump_type])
        .observe(duration.as_secs_f64());
}

pub fn record_bytes_stored(bytes: u64) {
    DUMP_BYTES_STORED_TOTAL.inc_by(bytes as f64);
}

pub fn record_chunk_written() {
    DUMP_CHUNKS_WRITTEN_TOTAL.inc();
}

pub fn record_deletion(reason: &str) {
    DUMP_DELETIONS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn set_job_queue_depth(depth: usize) {
    JOB_QUEUE_DEPTH.set(depth as f64);
}

pub fn record_job_execution(kind: &str, result: &str) {
    JOB_EXECUTIONS_TOTAL.with_label_values(&[kind, result]).inc();
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
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
