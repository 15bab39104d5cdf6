//! Batch entry point of the transform stage.
//!
//! The router starts this job with `--SOURCE_BUCKET` and `--SOURCE_KEY`
//! arguments; the job runtime exposes them as `SOURCE_BUCKET`/`SOURCE_KEY`
//! environment variables. A non-zero exit marks the run as failed, which
//! keeps the catalog crawler from being armed.

use analytics_core::storage::S3ObjectStore;
use analytics_core::telemetry::init_tracing;
use analytics_core::EnvironmentConfig;
use anyhow::Context as _;
use std::time::Duration;
use tracing::{error, info, warn};

mod job;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = EnvironmentConfig::load_from_env().context("loading pipeline configuration")?;

    if let Ok(bucket) = std::env::var("SOURCE_BUCKET") {
        if bucket != config.storage.bucket {
            warn!(
                trigger_bucket = %bucket,
                configured_bucket = %config.storage.bucket,
                "Trigger bucket differs from configuration, reading the configured bucket"
            );
        }
    }
    let source_key = std::env::var("SOURCE_KEY").ok();
    let limit = Duration::from_secs(config.compute.curate.timeout_seconds);

    let store = S3ObjectStore::from_env().await;
    match job::run_with_timeout(&config, &store, source_key.as_deref(), limit).await {
        Ok(summary) => {
            info!(rows = summary.rows, source = %summary.source, output = %summary.output, "Curate run complete");
            Ok(())
        }
        Err(e) => {
            error!("Curate run failed: {}", e);
            Err(e.into())
        }
    }
}
