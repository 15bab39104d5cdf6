use analytics_core::curate::{curate_rows, write_parquet};
use analytics_core::normalize::read_normalized_csv;
use analytics_core::storage::{s3_url, ObjectStore, PARQUET_CONTENT_TYPE};
use analytics_core::{EnvironmentConfig, PipelineError, Result};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurateSummary {
    pub source: String,
    pub output: String,
    pub rows: usize,
}

/// Converts the normalized CSV at `source_key` (or the configured default)
/// into the single curated Parquet object.
pub async fn run_curate(
    config: &EnvironmentConfig,
    store: &dyn ObjectStore,
    source_key: Option<&str>,
) -> Result<CurateSummary> {
    let bucket = &config.storage.bucket;
    let default_key = config.normalized_key();
    let source_key = source_key.filter(|k| !k.is_empty()).unwrap_or(default_key.as_str());

    let csv = store
        .get(bucket, source_key)
        .await?
        .ok_or_else(|| PipelineError::ObjectBody {
            bucket: bucket.clone(),
            key: source_key.to_string(),
            message: "normalized dataset not found".to_string(),
        })?;

    let normalized = read_normalized_csv(&csv)?;
    let curated = curate_rows(&normalized);
    info!(rows = curated.len(), source = %s3_url(bucket, source_key), "Curated normalized rows");

    let output_key = config.curated_key();
    let parquet = write_parquet(&curated)?;
    store
        .put(bucket, &output_key, parquet.to_vec(), PARQUET_CONTENT_TYPE)
        .await?;

    Ok(CurateSummary {
        source: s3_url(bucket, source_key),
        output: s3_url(bucket, &output_key),
        rows: curated.len(),
    })
}

/// Runs [`run_curate`] under the stage's wall-clock limit. On timeout the
/// run is dropped before its write.
pub async fn run_with_timeout(
    config: &EnvironmentConfig,
    store: &dyn ObjectStore,
    source_key: Option<&str>,
    limit: Duration,
) -> Result<CurateSummary> {
    tokio::time::timeout(limit, run_curate(config, store, source_key))
        .await
        .map_err(|_| PipelineError::Timeout(limit.as_secs()))?
}
