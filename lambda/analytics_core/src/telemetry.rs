use crate::error::{PipelineError, Result};
use crate::usage::Source;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{sleep, Duration};
use tracing_subscriber::EnvFilter;

/// Set to `true` to export metrics to the local collector extension.
pub const METRICS_ENABLED_VAR: &str = "OTEL_METRICS_ENABLED";
const METRICS_ENDPOINT: &str = "http://127.0.0.1:4318/v1/metrics";
const METER_NAME: &str = "conversation-analytics";
const FLUSH_GRACE: Duration = Duration::from_millis(500);

static METRICS_ACTIVE: AtomicBool = AtomicBool::new(false);

/// JSON logs for CloudWatch, filtered by `RUST_LOG` (default `info`).
/// Fails when a global subscriber is already installed.
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_current_span(false)
        .try_init()
        .map_err(|e| PipelineError::TelemetryError(e.to_string()))
}

/// Installs the OTLP metrics pipeline when [`METRICS_ENABLED_VAR`] is set.
/// Without it the global meter stays a no-op.
pub fn init_metrics(service_name: &str, environment: &str) -> Result<bool> {
    let enabled = std::env::var(METRICS_ENABLED_VAR)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    if !enabled {
        return Ok(false);
    }

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("aws.local.environment", environment.to_string()),
        KeyValue::new("application", "ConversationAnalytics"),
    ]);

    let meter_provider = opentelemetry_otlp::new_pipeline()
        .metrics(opentelemetry_sdk::runtime::Tokio)
        .with_resource(resource)
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(METRICS_ENDPOINT),
        )
        .build()
        .map_err(|e| PipelineError::TelemetryError(e.to_string()))?;

    global::set_meter_provider(meter_provider);
    METRICS_ACTIVE.store(true, Ordering::Release);
    Ok(true)
}

/// Records one job's token totals and cost.
pub fn record_token_metrics(source: Source, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
    let meter = global::meter(METER_NAME);
    let token_counter = meter.u64_counter("pipeline.token.usage").init();
    let cost_counter = meter.f64_counter("pipeline.cost.usd").init();

    token_counter.add(
        input_tokens,
        &[
            KeyValue::new("kind", "input"),
            KeyValue::new("source", source.as_str()),
        ],
    );
    token_counter.add(
        output_tokens,
        &[
            KeyValue::new("kind", "output"),
            KeyValue::new("source", source.as_str()),
        ],
    );
    cost_counter.add(cost_usd, &[KeyValue::new("source", source.as_str())]);
}

/// Whether [`init_metrics`] installed an exporting provider.
pub fn metrics_active() -> bool {
    METRICS_ACTIVE.load(Ordering::Acquire)
}

/// Gives the collector extension time to export before the runtime freezes.
/// Returns at once when no exporter is installed.
pub async fn flush_telemetry() {
    if metrics_active() {
        sleep(FLUSH_GRACE).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_flush_without_exporter_returns_immediately() {
        assert!(!metrics_active());
        let started = Instant::now();
        flush_telemetry().await;
        assert!(started.elapsed() < FLUSH_GRACE);
    }

    #[test]
    fn test_second_tracing_init_is_reported() {
        let _ = init_tracing();
        assert!(init_tracing().is_err());
    }
}
