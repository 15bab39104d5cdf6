use analytics_core::dynamo::ConversationSource;
use analytics_core::pricing::Pricing;
use analytics_core::processing::{process_items, ProcessingOptions};
use analytics_core::report::{
    log_unknown_content_types, JobResponse, RecordCounts, STATUS_NO_CONTENT, STATUS_OK,
};
use analytics_core::storage::{s3_url, ObjectStore, CSV_CONTENT_TYPE};
use analytics_core::telemetry::{flush_telemetry, record_token_metrics};
use analytics_core::tokens::Heuristic;
use analytics_core::usage::{write_csv, Source, UsageStatistics};
use analytics_core::{EnvironmentConfig, Result};
use lambda_runtime::{Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

pub struct Services {
    pub config: EnvironmentConfig,
    pub source: Box<dyn ConversationSource>,
    pub store: Box<dyn ObjectStore>,
}

/// Scans the legacy table once and writes the archival usage CSV.
pub async fn run_archival(
    config: &EnvironmentConfig,
    source: &dyn ConversationSource,
    store: &dyn ObjectStore,
) -> Result<JobResponse> {
    let range = config.date_ranges.archival.resolve_today();
    info!(table = source.name(), start = %range.start, end = %range.end, "Starting archival run");

    let items = source.scan().await?;
    if items.is_empty() {
        info!("Legacy table is empty, nothing to archive");
        return Ok(JobResponse {
            status_code: STATUS_NO_CONTENT,
            message: "No records found in the legacy table".to_string(),
            records: RecordCounts::default(),
            date_range: range,
            statistics: None,
            output: None,
        });
    }

    let options = ProcessingOptions {
        heuristic: Heuristic::Legacy,
        range,
        pricing: Pricing::from(&config.pricing),
        source: Source::OldTable,
    };
    let outcome = process_items(&items, &options);
    log_unknown_content_types(&outcome.unknown_content_types);
    let records = RecordCounts::from_outcome(items.len(), &outcome);

    if outcome.rows.is_empty() {
        info!(filtered = outcome.filtered, "No records inside the archival range");
        return Ok(JobResponse {
            status_code: STATUS_NO_CONTENT,
            message: "No records inside the archival date range".to_string(),
            records,
            date_range: range,
            statistics: None,
            output: None,
        });
    }

    let bucket = &config.storage.bucket;
    let key = config.historical_key();
    store
        .put(bucket, &key, write_csv(&outcome.rows)?, CSV_CONTENT_TYPE)
        .await?;

    let statistics = UsageStatistics::from_rows(&outcome.rows);
    record_token_metrics(
        Source::OldTable,
        statistics.total_input_tokens,
        statistics.total_output_tokens,
        statistics.total_cost_f64(),
    );

    info!(
        rows = outcome.rows.len(),
        filtered = outcome.filtered,
        errors = outcome.errors,
        total_cost = %statistics.total_cost,
        "Archival run complete"
    );

    Ok(JobResponse {
        status_code: STATUS_OK,
        message: "Archival token analysis complete".to_string(),
        records,
        date_range: range,
        statistics: Some(statistics),
        output: Some(s3_url(bucket, &key)),
    })
}

pub(crate) async fn function_handler(
    event: LambdaEvent<Value>,
    services: Arc<Services>,
) -> std::result::Result<JobResponse, Error> {
    info!(request_id = %event.context.request_id, "Archival invocation");

    let response = run_archival(&services.config, services.source.as_ref(), services.store.as_ref())
        .await
        .map_err(|e| {
            error!("Archival run failed: {}", e);
            e
        })?;

    flush_telemetry().await;
    Ok(response)
}
