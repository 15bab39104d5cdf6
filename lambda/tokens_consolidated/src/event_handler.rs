use analytics_core::athena::{tokens_view_sql, QueryRunner};
use analytics_core::consolidate::consolidate;
use analytics_core::dynamo::ConversationSource;
use analytics_core::pricing::Pricing;
use analytics_core::processing::{process_items, ProcessingOptions};
use analytics_core::report::{log_unknown_content_types, JobResponse, RecordCounts, STATUS_OK};
use analytics_core::storage::{s3_url, ObjectStore, CSV_CONTENT_TYPE};
use analytics_core::telemetry::{flush_telemetry, record_token_metrics};
use analytics_core::tokens::Heuristic;
use analytics_core::usage::{read_csv, write_csv, Source, TokenUsageRow, UsageStatistics};
use analytics_core::{EnvironmentConfig, Result};
use lambda_runtime::{Error, LambdaEvent};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Services {
    pub config: EnvironmentConfig,
    pub source: Box<dyn ConversationSource>,
    pub store: Box<dyn ObjectStore>,
    pub queries: Box<dyn QueryRunner>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedResponse {
    #[serde(flatten)]
    pub job: JobResponse,
    pub archival_rows: usize,
    pub new_rows: usize,
    pub consolidated_rows: usize,
    /// `None` when publishing the view failed; the CSV is still current.
    pub athena_query_id: Option<String>,
}

/// Reads the archival dataset. A missing object is an empty dataset; any
/// other storage failure aborts the run.
async fn load_archival(store: &dyn ObjectStore, config: &EnvironmentConfig) -> Result<Vec<TokenUsageRow>> {
    let key = config.historical_key();
    match store.get(&config.storage.bucket, &key).await? {
        Some(bytes) => {
            let rows = read_csv(&bytes)?;
            info!(rows = rows.len(), key = %key, "Loaded archival dataset");
            Ok(rows)
        }
        None => {
            warn!(key = %key, "Archival dataset not found, consolidating new rows only");
            Ok(Vec::new())
        }
    }
}

pub async fn run_consolidated(
    config: &EnvironmentConfig,
    source: &dyn ConversationSource,
    store: &dyn ObjectStore,
    queries: &dyn QueryRunner,
) -> Result<ConsolidatedResponse> {
    let range = config.date_ranges.consolidated.resolve_today();
    info!(table = source.name(), start = %range.start, end = %range.end, "Starting consolidated run");

    let items = source.scan().await?;
    let options = ProcessingOptions {
        heuristic: Heuristic::Enhanced,
        range,
        pricing: Pricing::from(&config.pricing),
        source: Source::NewTable,
    };
    let outcome = process_items(&items, &options);
    log_unknown_content_types(&outcome.unknown_content_types);
    let records = RecordCounts::from_outcome(items.len(), &outcome);
    let new_rows = outcome.rows.len();

    let archival = load_archival(store, config).await?;
    let archival_rows = archival.len();
    let consolidated = consolidate(archival, outcome.rows);

    let bucket = &config.storage.bucket;
    let key = config.consolidated_key();
    store
        .put(bucket, &key, write_csv(&consolidated)?, CSV_CONTENT_TYPE)
        .await?;

    let statistics = UsageStatistics::from_rows(&consolidated);
    let new_only: Vec<TokenUsageRow> = consolidated
        .iter()
        .filter(|row| row.source == Source::NewTable)
        .cloned()
        .collect();
    let new_statistics = UsageStatistics::from_rows(&new_only);
    record_token_metrics(
        Source::NewTable,
        new_statistics.total_input_tokens,
        new_statistics.total_output_tokens,
        new_statistics.total_cost_f64(),
    );

    let sql = tokens_view_sql(&config.query.view, &config.query.tokens_table);
    let athena_query_id = match queries.start_query(&sql).await {
        Ok(id) => Some(id),
        Err(e) => {
            error!(view = %config.query.view, "Failed to publish Athena view: {}", e);
            None
        }
    };

    info!(
        archival_rows,
        new_rows,
        consolidated_rows = consolidated.len(),
        total_cost = %statistics.total_cost,
        "Consolidated run complete"
    );

    Ok(ConsolidatedResponse {
        job: JobResponse {
            status_code: STATUS_OK,
            message: "Consolidated token analysis complete".to_string(),
            records,
            date_range: range,
            statistics: Some(statistics),
            output: Some(s3_url(bucket, &key)),
        },
        archival_rows,
        new_rows,
        consolidated_rows: consolidated.len(),
        athena_query_id,
    })
}

pub(crate) async fn function_handler(
    event: LambdaEvent<Value>,
    services: Arc<Services>,
) -> std::result::Result<ConsolidatedResponse, Error> {
    info!(request_id = %event.context.request_id, "Consolidated invocation");

    let response = run_consolidated(
        &services.config,
        services.source.as_ref(),
        services.store.as_ref(),
        services.queries.as_ref(),
    )
    .await
    .map_err(|e| {
        error!("Consolidated run failed: {}", e);
        e
    })?;

    flush_telemetry().await;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_core::athena::RecordingQueryRunner;
    use analytics_core::dynamo::StaticConversationSource;
    use analytics_core::pricing::Pricing;
    use analytics_core::storage::MemoryObjectStore;
    use analytics_core::tokens::TokenCounts;
    use analytics_core::Environment;
    use lambda_runtime::Context;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> EnvironmentConfig {
        EnvironmentConfig::embedded(Environment::Dev).unwrap()
    }

    // 2025-12-28 10:00:00 UTC
    const DEC_28: i64 = 1766916000000;

    fn item(pk: &str, sk: &str, millis: i64) -> Value {
        json!({
            "PK": pk,
            "SK": sk,
            "CreateTime": millis,
            "MessageMap": {
                "q": {"role": "user", "content": [{"content_type": "text", "body": "x".repeat(40)}]},
                "a": {"role": "assistant", "content": [
                    {"content_type": "toolUse", "body": {"input": {"a": "bcd"}}},
                    {"content_type": "text", "body": "y".repeat(20)}
                ]}
            }
        })
    }

    fn archival_row(pk: &str, sk: &str, create_date: &str) -> TokenUsageRow {
        let counts = TokenCounts { input: 100, output: 40 };
        let price = Pricing::default().price(counts);
        TokenUsageRow {
            create_date: create_date.to_string(),
            input_token: counts.input,
            output_token: counts.output,
            input_price: price.input,
            output_price: price.output,
            total_price: price.total,
            pk: pk.to_string(),
            sk: sk.to_string(),
            source: Source::OldTable,
        }
    }

    #[tokio::test]
    async fn test_consolidates_without_archival_object() {
        let config = config();
        let source = StaticConversationSource::new(
            "current",
            vec![
                item("pk1", "sk1", DEC_28),
                item("pk2", "sk2", DEC_28 + 3_600_000),
                item("pk3", "sk3", DEC_28 - 3_600_000),
            ],
        );
        let store = MemoryObjectStore::new();
        let queries = RecordingQueryRunner::default();

        let response = run_consolidated(&config, &source, &store, &queries).await.unwrap();
        assert_eq!(response.archival_rows, 0);
        assert_eq!(response.consolidated_rows, 3);
        assert_eq!(response.athena_query_id.as_deref(), Some("query-1"));

        let stored = store
            .object(&config.storage.bucket, &config.consolidated_key())
            .unwrap();
        let rows = read_csv(&stored).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.pk.as_str()).collect::<Vec<_>>(),
            vec!["pk2", "pk1", "pk3"]
        );
        assert!(rows.iter().all(|r| r.source == Source::NewTable));
        // 40 chars of question; 12 chars of tool input plus 20 of text.
        assert_eq!(rows[0].input_token, 10);
        assert_eq!(rows[0].output_token, 8);

        assert!(queries.statements()[0].contains("CREATE OR REPLACE VIEW tokens_usage_analysis"));
    }

    #[tokio::test]
    async fn test_archival_row_wins_collision() {
        let config = config();
        let store = MemoryObjectStore::new();
        let archival = vec![archival_row("pk1", "sk1", "2025-12-20 09:00:00")];
        store.insert(
            &config.storage.bucket,
            &config.historical_key(),
            write_csv(&archival).unwrap(),
        );
        let source = StaticConversationSource::new(
            "current",
            vec![item("pk1", "sk1", DEC_28), item("pk2", "sk2", DEC_28)],
        );

        let response = run_consolidated(&config, &source, &store, &RecordingQueryRunner::default())
            .await
            .unwrap();
        assert_eq!(response.archival_rows, 1);
        assert_eq!(response.new_rows, 2);
        assert_eq!(response.consolidated_rows, 2);

        let rows = read_csv(&store.object(&config.storage.bucket, &config.consolidated_key()).unwrap()).unwrap();
        let kept = rows.iter().find(|r| r.pk == "pk1").unwrap();
        assert_eq!(kept.source, Source::OldTable);
        assert_eq!(kept.create_date, "2025-12-20 09:00:00");
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let config = config();
        let store = MemoryObjectStore::new();
        let source = StaticConversationSource::new("current", vec![item("pk1", "sk1", DEC_28)]);
        let queries = RecordingQueryRunner::default();

        run_consolidated(&config, &source, &store, &queries).await.unwrap();
        let first = store.object(&config.storage.bucket, &config.consolidated_key()).unwrap();
        run_consolidated(&config, &source, &store, &queries).await.unwrap();
        let second = store.object(&config.storage.bucket, &config.consolidated_key()).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_run_writes_header_only() {
        let config = config();
        let store = MemoryObjectStore::new();
        let source = StaticConversationSource::new("current", vec![]);

        let response = run_consolidated(&config, &source, &store, &RecordingQueryRunner::default())
            .await
            .unwrap();
        assert_eq!(response.consolidated_rows, 0);
        let stored = store.object(&config.storage.bucket, &config.consolidated_key()).unwrap();
        assert_eq!(stored.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[tokio::test]
    async fn test_view_failure_is_not_fatal() {
        let config = config();
        let store = MemoryObjectStore::new();
        let source = StaticConversationSource::new("current", vec![item("pk1", "sk1", DEC_28)]);

        let response = run_consolidated(&config, &source, &store, &RecordingQueryRunner::failing())
            .await
            .unwrap();
        assert_eq!(response.athena_query_id, None);
        assert!(store.object(&config.storage.bucket, &config.consolidated_key()).is_some());
    }

    #[tokio::test]
    async fn test_event_handler() {
        let services = Arc::new(Services {
            config: config(),
            source: Box::new(StaticConversationSource::new("current", vec![item("pk1", "sk1", DEC_28)])),
            store: Box::new(MemoryObjectStore::new()),
            queries: Box::new(RecordingQueryRunner::default()),
        });
        let event = LambdaEvent::new(json!({"source": "aws.events"}), Context::default());
        let response = function_handler(event, services).await.unwrap();

        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(body["statusCode"], json!(200));
        assert_eq!(body["consolidated_rows"], json!(1));
        assert_eq!(body["athena_query_id"], json!("query-1"));
        assert_eq!(body["date_range"]["start"], json!("2025-12-27"));
    }
}
