// Telemetry module for structured logging, metrics, and tracing
//
// The worker is a background process with no synchronous caller, so every outcome is only
// visible through these logs and metrics.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "trigger-worker";

/// Initialize structured JSON logging, optionally exporting spans over OTLP
///
/// `RUST_LOG` takes precedence over `log_level`.
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    Ok(tracer_provider.tracer(SERVICE_NAME))
}

/// Flush remaining spans on shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the worker metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("trigger_claimed_total", "Triggers leased to this worker");
    describe_counter!("trigger_run_success_total", "Successful trigger runs");
    describe_counter!(
        "trigger_run_failed_total",
        "Failed trigger runs, labelled by failure kind"
    );
    describe_histogram!(
        "trigger_run_duration_seconds",
        "Duration of job procedure calls in seconds"
    );
    describe_counter!("trigger_claim_failed_total", "Claim calls that failed");
    describe_counter!(
        "trigger_report_failed_total",
        "Report calls that failed; the trigger stays leased until the lease expires"
    );
    describe_gauge!("trigger_runs_in_flight", "Trigger runs currently holding a slot");

    tracing::info!(metrics_port = metrics_port, "Prometheus metrics exporter initialized");

    Ok(())
}

#[inline]
pub fn record_claimed(count: usize) {
    counter!("trigger_claimed_total").increment(count as u64);
}

#[inline]
pub fn record_run_success(procedure: &str) {
    counter!("trigger_run_success_total", "procedure" => procedure.to_string()).increment(1);
}

#[inline]
pub fn record_run_failure(procedure: &str, reason: &str) {
    counter!(
        "trigger_run_failed_total",
        "procedure" => procedure.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_run_duration(procedure: &str, duration: Duration) {
    histogram!("trigger_run_duration_seconds", "procedure" => procedure.to_string())
        .record(duration.as_secs_f64());
}

#[inline]
pub fn record_claim_failure() {
    counter!("trigger_claim_failed_total").increment(1);
}

#[inline]
pub fn record_report_failure() {
    counter!("trigger_report_failed_total").increment(1);
}

#[inline]
pub fn update_runs_in_flight(delta: f64) {
    gauge!("trigger_runs_in_flight").increment(delta);
}
