use analytics_core::dynamo::ConversationSource;
use analytics_core::normalize::{normalize_items, write_normalized_csv};
use analytics_core::pricing::Pricing;
use analytics_core::report::log_unknown_content_types;
use analytics_core::storage::{s3_url, ObjectStore, CSV_CONTENT_TYPE};
use analytics_core::{EnvironmentConfig, Result};
use lambda_runtime::{Error, LambdaEvent};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

pub struct Services {
    pub config: EnvironmentConfig,
    pub source: Box<dyn ConversationSource>,
    pub store: Box<dyn ObjectStore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizeResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub users: usize,
    pub conversations: usize,
    pub skipped: usize,
    pub output: String,
}

/// Rewrites the normalized CSV from a full table scan. The previous run's
/// output is replaced, never merged.
pub async fn run_normalize(
    config: &EnvironmentConfig,
    source: &dyn ConversationSource,
    store: &dyn ObjectStore,
) -> Result<NormalizeResponse> {
    let range = config.date_ranges.normalize.resolve_today();
    info!(table = source.name(), start = %range.start, end = %range.end, "Starting normalize run");

    let items = source.scan().await?;
    let outcome = normalize_items(&items, &range, &Pricing::from(&config.pricing));
    log_unknown_content_types(&outcome.unknown_content_types);

    let bucket = &config.storage.bucket;
    let key = config.normalized_key();
    store
        .put(bucket, &key, write_normalized_csv(&outcome.rows)?, CSV_CONTENT_TYPE)
        .await?;

    Ok(NormalizeResponse {
        status_code: 200,
        users: outcome.rows.len(),
        conversations: outcome.conversations,
        skipped: outcome.skipped,
        output: s3_url(bucket, &key),
    })
}

pub(crate) async fn function_handler(
    event: LambdaEvent<Value>,
    services: Arc<Services>,
) -> std::result::Result<NormalizeResponse, Error> {
    info!(request_id = %event.context.request_id, "Normalize invocation");

    let response = run_normalize(&services.config, services.source.as_ref(), services.store.as_ref())
        .await
        .map_err(|e| {
            error!("Normalize run failed: {}", e);
            e
        })?;

    info!(users = response.users, output = %response.output, "Normalize run complete");
    Ok(response)
}
